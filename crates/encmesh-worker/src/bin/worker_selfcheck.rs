use std::path::Path;

use encmesh_media::{check_ffmpeg, detect_encoders};
use encmesh_worker::WorkerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = WorkerConfig::from_env();

    println!(
        "worker-selfcheck: starting with temp_root={} shared_root={}",
        config.temp_root.display(),
        config.shared_root.display()
    );
    config.validate()?;
    ensure_writable(&config.temp_root).await?;
    ensure_shared_root(&config.shared_root).await?;
    let binary = check_ffmpeg(&config.ffmpeg_path)
        .map_err(|e| anyhow::anyhow!("ffmpeg not available: {}", e))?;
    println!("worker-selfcheck: ffmpeg at {}", binary.display());

    let codecs = detect_encoders(&binary).await?;
    if codecs.is_empty() {
        return Err(anyhow::anyhow!("ffmpeg offers none of the supported encoders"));
    }
    let names: Vec<&str> = codecs.iter().map(|c| c.as_str()).collect();
    println!("worker-selfcheck: encoders {}", names.join(", "));

    println!("worker-selfcheck: ok");
    Ok(())
}

async fn ensure_writable(path: &Path) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(path).await?;
    let marker = path.join(".selfcheck");
    tokio::fs::write(&marker, b"ok").await?;
    tokio::fs::remove_file(&marker).await?;
    Ok(())
}

async fn ensure_shared_root(path: &Path) -> anyhow::Result<()> {
    let meta = tokio::fs::metadata(path)
        .await
        .map_err(|e| anyhow::anyhow!("shared root {} unavailable: {}", path.display(), e))?;
    if !meta.is_dir() {
        return Err(anyhow::anyhow!("shared root {} is not a directory", path.display()));
    }
    Ok(())
}
