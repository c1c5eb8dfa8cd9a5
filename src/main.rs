#[tokio::main]
async fn main() {
    if sma_bridge::app().await.is_err() {
        std::process::exit(1);
    }
}
