use std::io::{self, BufRead, BufReader, Write};
use std::thread;

use anyhow::Result;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

/// Line-oriented prompts on stdout.
///
/// Input is read on its own thread: a read still blocked on stdin must not
/// hold up runtime shutdown after Ctrl-C.
pub struct Terminal {
    lines: UnboundedReceiver<io::Result<String>>,
}

impl Terminal {
    pub fn new() -> Self {
        Self::from_reader(BufReader::new(io::stdin()))
    }

    pub fn from_reader<R: BufRead + Send + 'static>(reader: R) -> Self {
        let (sender, lines) = unbounded_channel();

        thread::spawn(move || {
            for line in reader.lines() {
                let failed = line.is_err();

                if sender.send(line).is_err() || failed {
                    break;
                }
            }
        });

        Self { lines }
    }

    /// Returns `None` once stdin is closed.
    pub async fn ask(&mut self, prompt: &str) -> Result<Option<String>> {
        print!("{prompt}");
        io::stdout().flush()?;

        Ok(self.lines.recv().await.transpose()?)
    }

    pub async fn confirm(&mut self, prompt: &str) -> Result<bool> {
        let answer = self.ask(&format!("{prompt} [y/N] ")).await?;

        Ok(matches!(
            answer.as_deref().map(str::trim),
            Some("y") | Some("Y") | Some("yes")
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[tokio::test]
    async fn reads_lines_until_closed() {
        let mut terminal = Terminal::from_reader(Cursor::new("徳川家康\n\ny\nn\n"));

        assert_eq!(
            terminal.ask("答え: ").await.unwrap().as_deref(),
            Some("徳川家康")
        );
        assert_eq!(terminal.ask("").await.unwrap().as_deref(), Some(""));
        assert!(terminal.confirm("削除しますか？").await.unwrap());
        assert!(!terminal.confirm("削除しますか？").await.unwrap());
        assert_eq!(terminal.ask("").await.unwrap(), None);
        assert!(!terminal.confirm("削除しますか？").await.unwrap());
    }
}
