use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// Read a command's error stream line by line until EOF.
///
/// Every line is prefixed with `prefix`, appended to the returned buffer and
/// logged at debug level as it arrives. A trailing line without a newline is
/// kept as-is.
pub async fn drain_prefixed<R>(stream: R, prefix: &str) -> Vec<u8>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut buffer = Vec::new();
    let mut line = Vec::new();

    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                buffer.extend_from_slice(prefix.as_bytes());
                buffer.extend_from_slice(&line);
                let text = String::from_utf8_lossy(&line);
                tracing::debug!("{}{}", prefix, text.trim_end_matches(['\r', '\n']));
            }
            Err(e) => {
                tracing::warn!(error = %e, "Copying command stderr to logs failed");
                break;
            }
        }
    }

    buffer
}
