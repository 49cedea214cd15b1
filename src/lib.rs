//! Natural hazard screening pipeline.
//!
//! Collects geospatial hazard layers into a PostGIS database, intersects
//! buffered sites of interest against them, classifies per-hazard exposure
//! (ordinal / nominal / discrete / continuous), and derives publishable
//! tables. See `DESIGN.md` for the component map.

pub mod collect;
pub mod config;
pub mod error;
pub mod hazard;
pub mod intersect;
pub mod publish;
pub mod select;
pub mod store;

pub use error::Error;
pub use error::Result;

use std::sync::Arc;
use tokio_postgres::Client;

/// Initialize dual logging (terminal + file) with timestamped log files.
/// Creates `logs/` and writes DEBUG level to file, INFO to terminal.
pub fn log() {
    std::fs::create_dir_all("logs").expect("create logs directory");
    let config = simplelog::ConfigBuilder::new()
        .set_location_level(log::LevelFilter::Off)
        .set_target_level(log::LevelFilter::Off)
        .set_thread_level(log::LevelFilter::Off)
        .build();
    let time = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("time moves slow")
        .as_secs();
    let file = simplelog::WriteLogger::new(
        log::LevelFilter::Debug,
        config.clone(),
        std::fs::File::create(format!("logs/{}.log", time)).expect("create log file"),
    );
    let term = simplelog::TermLogger::new(
        log::LevelFilter::Info,
        config.clone(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );
    simplelog::CombinedLogger::init(vec![term, file]).expect("initialize logger");
}

/// Connect to the database, verify the spatial extension, and return the
/// client. The connection task is spawned onto the runtime.
pub async fn db(url: &str) -> Result<Arc<Client>> {
    log::info!("connecting to database");
    let tls = tokio_postgres::tls::NoTls;
    let (client, connection) = tokio_postgres::connect(url, tls).await?;
    tokio::spawn(connection);
    let version = client
        .query_one("SELECT PostGIS_Version()", &[])
        .await?
        .get::<_, String>(0);
    log::debug!("postgis version {}", version);
    Ok(Arc::new(client))
}
