#[tokio::main]
async fn main() {
    auction_house::start(std::env::args()).await;
}
