// Tar transport between the server and the executor container.
//
// Docker only accepts and returns file trees as tar archives, so uploads are
// packed in memory and downloads are scanned for the one file we asked for.

use async_tar::{Archive, Builder, Header};
use futures_util::io::{self, AsyncReadExt};
use futures_util::stream::StreamExt;
use thiserror::Error;

/// Owner of uploaded files; matches the executor image's `arena` user
pub const EXECUTOR_UID: u64 = 1000;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("archive i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("entry '{0}' not found in archive")]
    NotFound(String),
}

/// Pack `(name, bytes)` pairs into a tar archive, preserving order and
/// content byte for byte.
pub async fn pack<N, B>(files: &[(N, B)]) -> Result<Vec<u8>, TransportError>
where
    N: AsRef<str>,
    B: AsRef<[u8]>,
{
    let mut builder = Builder::new(Vec::new());

    for (name, data) in files {
        let data = data.as_ref();
        let mut header = Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_uid(EXECUTOR_UID);
        header.set_gid(EXECUTOR_UID);
        header.set_cksum();
        builder.append_data(&mut header, name.as_ref(), data).await?;
    }

    Ok(builder.into_inner().await?)
}

/// Extract the content of `target` from a tar archive.
///
/// Entries that do not match are drained rather than buffered.
pub async fn unpack(archive: &[u8], target: &str) -> Result<Vec<u8>, TransportError> {
    let entries = Archive::new(archive).entries()?;
    futures_util::pin_mut!(entries);

    while let Some(entry) = entries.next().await {
        let entry = entry?;
        let matches = {
            let raw = entry.path_bytes();
            let raw = raw.strip_prefix(b"./").unwrap_or(&raw[..]);
            raw == target.as_bytes()
        };

        futures_util::pin_mut!(entry);
        if matches {
            let mut content = Vec::new();
            entry.read_to_end(&mut content).await?;
            return Ok(content);
        }
        io::copy(entry, &mut io::sink()).await?;
    }

    Err(TransportError::NotFound(target.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_round_trip_binary_content() {
        let payload = b"hel\0lo\nwor\r\nld\x7f".to_vec();
        let archive = pack(&[("a.txt", payload.clone())]).await.unwrap();
        assert_eq!(unpack(&archive, "a.txt").await.unwrap(), payload);
    }

    #[tokio::test]
    async fn test_unpack_skips_preceding_entries() {
        let big = vec![b'x'; 70_000];
        let archive = pack(&[
            ("main.c", big.as_slice()),
            ("input.txt", b"1 2\n3".as_slice()),
        ])
        .await
        .unwrap();

        assert_eq!(unpack(&archive, "input.txt").await.unwrap(), b"1 2\n3");
        assert_eq!(unpack(&archive, "main.c").await.unwrap().len(), 70_000);
    }

    #[tokio::test]
    async fn test_empty_file_round_trip() {
        let archive = pack(&[("output.txt", b"".as_slice())]).await.unwrap();
        assert!(unpack(&archive, "output.txt").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_entry_is_not_found() {
        let archive = pack(&[("a.txt", b"hello".as_slice())]).await.unwrap();
        let err = unpack(&archive, "b.txt").await.unwrap_err();
        assert!(matches!(err, TransportError::NotFound(name) if name == "b.txt"));
    }

    #[tokio::test]
    async fn test_leading_dot_slash_entry_matches() {
        let archive = pack(&[("./output.txt", b"42\n".as_slice())]).await.unwrap();
        assert_eq!(unpack(&archive, "output.txt").await.unwrap(), b"42\n");
    }

    #[tokio::test]
    async fn test_uploads_are_owned_by_executor_user() {
        let archive = pack(&[("main.c", b"int main(){}".as_slice())]).await.unwrap();
        let entries = Archive::new(archive.as_slice()).entries().unwrap();
        futures_util::pin_mut!(entries);
        let entry = entries.next().await.unwrap().unwrap();
        assert_eq!(entry.header().uid().unwrap(), EXECUTOR_UID);
        assert_eq!(entry.header().gid().unwrap(), EXECUTOR_UID);
    }

    #[tokio::test]
    async fn test_garbage_is_an_error_not_bytes() {
        let garbage = vec![0xAB; 1024];
        assert!(unpack(&garbage, "a.txt").await.is_err());
    }
}
