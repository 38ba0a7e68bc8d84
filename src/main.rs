// Thin delegating binary.
//
// The runner assembly lives in `openid_store::maintenance`.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    openid_store::run().await
}
