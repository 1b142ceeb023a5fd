use crate::processing::strip_ansi_codes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc::UnboundedSender;

/// Small reads so carriage-return progress redraws surface promptly.
const READ_CHUNK_SIZE: usize = 256;

/// Drains a child process stream into lines.
///
/// Lines end at `\n` or `\r`, are decoded lossily, trimmed and stripped of ANSI
/// codes. Empty lines and a repeat of the previous line are skipped. Every kept
/// line is also sent on `lines_tx` as it arrives; a closed receiver is ignored.
pub async fn read_process_stream<R>(
    mut stream: R,
    lines_tx: UnboundedSender<String>,
) -> std::io::Result<Vec<String>>
where
    R: AsyncRead + Unpin,
{
    let mut collector = LineCollector {
        lines: Vec::new(),
        lines_tx,
    };
    let mut buffer: Vec<u8> = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        let read = stream.read(&mut chunk).await?;
        if read == 0 {
            collector.push(&buffer);
            break;
        }
        buffer.extend_from_slice(&chunk[..read]);

        while let Some(pos) = buffer.iter().position(|b| *b == b'\n' || *b == b'\r') {
            let line: Vec<u8> = buffer.drain(..=pos).collect();
            collector.push(&line[..pos]);
        }
    }

    Ok(collector.lines)
}

struct LineCollector {
    lines: Vec<String>,
    lines_tx: UnboundedSender<String>,
}

impl LineCollector {
    fn push(&mut self, raw: &[u8]) {
        let text = String::from_utf8_lossy(raw);
        let line = strip_ansi_codes(text.trim());
        if line.is_empty() || self.lines.last() == Some(&line) {
            return;
        }

        let _ = self.lines_tx.send(line.clone());
        self.lines.push(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn carriage_return_redraws_are_coalesced() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let lines = read_process_stream(&b"10%\r10%\r11%\rdone\n"[..], tx)
            .await
            .unwrap();

        assert_eq!(lines, vec!["10%", "11%", "done"]);
        assert_eq!(lines.iter().filter(|l| *l == "10%").count(), 1);

        let mut sent = Vec::new();
        while let Ok(line) = rx.try_recv() {
            sent.push(line);
        }
        assert_eq!(sent, lines);
    }

    #[tokio::test]
    async fn lines_split_across_reads_are_joined() {
        let (mut writer, reader) = tokio::io::duplex(8);
        let (tx, _rx) = mpsc::unbounded_channel();

        let producer = tokio::spawn(async move {
            let pieces: [&[u8]; 4] = [
                b"Downloa",
                b"ding part 1\r\n",
                b"\x1b[32mSaved",
                b" to: a.m4b\x1b[0m",
            ];
            for piece in pieces {
                writer.write_all(piece).await.unwrap();
            }
        });

        let lines = read_process_stream(reader, tx).await.unwrap();
        producer.await.unwrap();

        assert_eq!(lines, vec!["Downloading part 1", "Saved to: a.m4b"]);
    }

    #[tokio::test]
    async fn invalid_utf8_is_replaced_not_fatal() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let lines = read_process_stream(&b"ok \xff\n\n   \n"[..], tx).await.unwrap();
        assert_eq!(lines, vec!["ok \u{fffd}"]);
    }

    #[tokio::test]
    async fn closed_receiver_does_not_stop_reading() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let lines = read_process_stream(&b"a\nb\n"[..], tx).await.unwrap();
        assert_eq!(lines, vec!["a", "b"]);
    }
}
