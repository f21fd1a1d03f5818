//! ffmpeg child process with a streaming stdin and a drained stdout

use crate::{Error, Result};
use std::io::{Read, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread::JoinHandle;

const READ_CHUNK: usize = 64 * 1024;

/// An encoder process fed through stdin
///
/// stdout is read on its own thread so the child never blocks on a full
/// pipe while we are still writing input.
pub(crate) struct FfmpegProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    output: Receiver<Vec<u8>>,
    reader: Option<JoinHandle<()>>,
    stderr: Option<JoinHandle<String>>,
}

impl FfmpegProcess {
    pub fn spawn(ffmpeg: &str, args: &[String]) -> Result<Self> {
        tracing::debug!(ffmpeg, args = %args.join(" "), "starting ffmpeg");
        let mut child = Command::new(ffmpeg)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Ffmpeg(format!("Failed to start ffmpeg: {}", e)))?;

        let stdin = child.stdin.take();
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Ffmpeg("FFmpeg stdout not available".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Ffmpeg("FFmpeg stderr not available".to_string()))?;

        let (sender, output) = mpsc::channel();
        let reader = std::thread::spawn(move || {
            let mut buffer = vec![0u8; READ_CHUNK];
            loop {
                match stdout.read(&mut buffer) {
                    Ok(0) => break,
                    Ok(n) => {
                        if sender.send(buffer[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
        });
        let stderr = std::thread::spawn(move || {
            let mut text = String::new();
            let _ = stderr.read_to_string(&mut text);
            text
        });

        Ok(Self {
            child,
            stdin,
            output,
            reader: Some(reader),
            stderr: Some(stderr),
        })
    }

    /// Write input, reporting ffmpeg's own message if it has exited
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| Error::Ffmpeg("FFmpeg stdin already closed".to_string()))?;
        if let Err(e) = stdin.write_all(data) {
            let detail = self.terminate();
            return Err(Error::Ffmpeg(format!(
                "Failed to write input: {}{}",
                e,
                suffix(&detail)
            )));
        }
        Ok(())
    }

    /// Output produced so far, without blocking
    pub fn try_read(&mut self) -> Vec<u8> {
        let mut data = Vec::new();
        loop {
            match self.output.try_recv() {
                Ok(chunk) => data.extend_from_slice(&chunk),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        data
    }

    /// Close stdin and collect the remaining output once ffmpeg exits
    pub fn finish(&mut self) -> Result<Vec<u8>> {
        drop(self.stdin.take());
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
        let data = self.try_read();

        let status = self
            .child
            .wait()
            .map_err(|e| Error::Ffmpeg(format!("FFmpeg process error: {}", e)))?;
        let detail = self.stderr_text();
        if !status.success() {
            return Err(Error::Ffmpeg(format!(
                "ffmpeg exited with {}{}",
                status,
                suffix(&detail)
            )));
        }
        Ok(data)
    }

    fn terminate(&mut self) -> String {
        drop(self.stdin.take());
        let _ = self.child.kill();
        let _ = self.child.wait();
        self.stderr_text()
    }

    fn stderr_text(&mut self) -> String {
        self.stderr
            .take()
            .and_then(|handle| handle.join().ok())
            .map(|text| text.trim().to_string())
            .unwrap_or_default()
    }
}

impl Drop for FfmpegProcess {
    fn drop(&mut self) {
        // Kill the process if it's still running
        drop(self.stdin.take());
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn suffix(detail: &str) -> String {
    if detail.is_empty() {
        String::new()
    } else {
        format!(": {}", detail)
    }
}
