use goodwe_bridge::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    let options = Options::new();
    let config = Config::new(&options.config_file)?;

    goodwe_bridge::init_logging(config.loglevel());

    goodwe_bridge::run(config).await
}
