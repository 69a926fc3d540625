use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

/// Pulls `name` from the transfer server at `addr` into `dest`.
///
/// Bytes land in a partial file next to `dest` and are renamed into place once
/// the server closes the stream, so `dest` never holds a torn copy. Every pull
/// gets its own partial file, so concurrent pulls into one `dest` cannot
/// truncate each other.
pub async fn pull_file(addr: SocketAddr, name: &str, dest: &Path) -> Result<u64> {
    let mut stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("connecting to transfer server {}", addr))?;

    stream.write_all(format!("{}\n", name).as_bytes()).await?;

    if let Some(parent) = dest.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }

    let partial = partial_path(dest);
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&partial)
        .await
        .with_context(|| format!("creating {}", partial.display()))?;

    let received = match tokio::io::copy(&mut stream, &mut file).await {
        Ok(received) => received,
        Err(e) => {
            drop(file);
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(anyhow::anyhow!("pulling {} from {}: {}", name, addr, e));
        }
    };
    file.flush().await?;
    drop(file);

    if let Err(e) = tokio::fs::rename(&partial, dest).await {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(e).with_context(|| format!("renaming into {}", dest.display()));
    }
    tracing::debug!("Pulled {} ({} bytes) from {}", name, received, addr);

    Ok(received)
}

/// `<dest>.<random>.partial`, unique per call.
pub(crate) fn partial_path(dest: &Path) -> PathBuf {
    let mut os = dest.as_os_str().to_owned();
    os.push(format!(".{:016x}.partial", rand::random::<u64>()));
    PathBuf::from(os)
}
