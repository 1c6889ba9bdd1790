use apsystems_bridge::options::Options;

#[tokio::main]
async fn main() {
    let options = Options::new();

    if let Err(err) = apsystems_bridge::app(options).await {
        eprintln!("apsystems-bridge: {:#}", err);
        std::process::exit(255);
    }
}
