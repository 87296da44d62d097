use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tempfile::TempDir;
use tracing::debug;
use wait_timeout::ChildExt;

use super::error::ExtractionError;
use super::extract::{OcrEngine, TextLayer};
use crate::model::ToolVersions;

/// Embedded text layer through poppler's `pdftotext`, one entry per page.
pub struct Pdftotext {
    timeout: Duration,
}

impl Pdftotext {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl TextLayer for Pdftotext {
    fn extract_pages(&self, pdf_path: &Path) -> Result<Vec<String>, ExtractionError> {
        let scratch = scratch_dir()?;
        let text_path = scratch.path().join("layer.txt");

        let mut command = Command::new("pdftotext");
        command
            .arg("-enc")
            .arg("UTF-8")
            .arg(pdf_path)
            .arg(&text_path);
        run_tool("pdftotext", command, pdf_path, self.timeout)?;

        let raw = fs::read(&text_path)?;
        Ok(split_pages(&String::from_utf8_lossy(&raw)))
    }
}

/// Rasterize with `pdftoppm`, recognize with `tesseract`.
pub struct TesseractOcr {
    lang: String,
    page_timeout: Duration,
}

impl TesseractOcr {
    pub fn new(lang: &str, page_timeout: Duration) -> Self {
        Self {
            lang: lang.to_string(),
            page_timeout,
        }
    }

    pub fn available() -> bool {
        ["pdfinfo", "pdftoppm", "tesseract"]
            .iter()
            .all(|program| command_available(program))
    }
}

impl OcrEngine for TesseractOcr {
    fn page_count(&self, pdf_path: &Path) -> Result<usize, ExtractionError> {
        let mut command = Command::new("pdfinfo");
        command.arg(pdf_path);
        let stdout = run_tool("pdfinfo", command, pdf_path, self.page_timeout)?;

        stdout
            .lines()
            .find_map(|line| line.strip_prefix("Pages:"))
            .and_then(|value| value.trim().parse::<usize>().ok())
            .ok_or_else(|| ExtractionError::ToolFailed {
                tool: "pdfinfo",
                path: pdf_path.display().to_string(),
                message: "no page count in output".to_string(),
            })
    }

    fn recognize_page(&self, pdf_path: &Path, page_number: usize) -> Result<String, ExtractionError> {
        let scratch = scratch_dir()?;
        let image_root = scratch.path().join(format!("page_{page_number:04}"));
        let png_path = PathBuf::from(format!("{}.png", image_root.display()));

        let mut pdftoppm = Command::new("pdftoppm");
        pdftoppm
            .arg("-f")
            .arg(page_number.to_string())
            .arg("-l")
            .arg(page_number.to_string())
            .arg("-r")
            .arg("300")
            .arg("-singlefile")
            .arg("-png")
            .arg(pdf_path)
            .arg(&image_root);
        run_tool("pdftoppm", pdftoppm, pdf_path, self.page_timeout)?;

        if !png_path.exists() {
            return Err(ExtractionError::ToolFailed {
                tool: "pdftoppm",
                path: pdf_path.display().to_string(),
                message: format!("no image produced for page {page_number}"),
            });
        }

        let text_root = scratch.path().join(format!("text_{page_number:04}"));
        let mut tesseract = Command::new("tesseract");
        tesseract
            .arg(&png_path)
            .arg(&text_root)
            .arg("-l")
            .arg(&self.lang);
        run_tool("tesseract", tesseract, pdf_path, self.page_timeout)?;

        let text_path = PathBuf::from(format!("{}.txt", text_root.display()));
        let raw = fs::read(&text_path)?;
        debug!(path = %pdf_path.display(), page = page_number, "recognized page");

        Ok(String::from_utf8_lossy(&raw)
            .replace('\u{0000}', "")
            .trim()
            .to_string())
    }
}

pub fn collect_tool_versions() -> ToolVersions {
    ToolVersions {
        pdftotext: command_version_optional("pdftotext", &["-v"]),
        pdfinfo: command_version_optional("pdfinfo", &["-v"]),
        pdftoppm: command_version_optional("pdftoppm", &["-v"]),
        tesseract: command_version_optional("tesseract", &["--version"]),
    }
}

pub fn command_available(program: &str) -> bool {
    Command::new(program)
        .arg("-v")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok()
}

fn command_version_optional(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program).args(args).output().ok()?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let source = if stdout.trim().is_empty() {
        stderr.trim()
    } else {
        stdout.trim()
    };

    source
        .lines()
        .next()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| line.to_string())
}

/// Runs a tool to completion within `timeout`, killing it otherwise.
/// Both pipes are drained while the tool runs. Returns captured stdout.
pub(super) fn run_tool(
    tool: &'static str,
    mut command: Command,
    pdf_path: &Path,
    timeout: Duration,
) -> Result<String, ExtractionError> {
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => ExtractionError::ToolUnavailable { tool },
            _ => ExtractionError::Io(err),
        })?;

    let stdout_reader = child.stdout.take().map(drain_pipe);
    let stderr_reader = child.stderr.take().map(drain_pipe);

    let status = match child.wait_timeout(timeout) {
        Ok(Some(status)) => status,
        unfinished => {
            let _ = child.kill();
            let _ = child.wait();
            let _ = collect_pipe(stdout_reader);
            let _ = collect_pipe(stderr_reader);
            return Err(match unfinished {
                Err(err) => ExtractionError::Io(err),
                Ok(_) => ExtractionError::Timeout {
                    tool,
                    path: pdf_path.display().to_string(),
                    seconds: timeout.as_secs(),
                },
            });
        }
    };

    let stdout = collect_pipe(stdout_reader)?;
    let stderr = collect_pipe(stderr_reader)?;
    if !status.success() {
        return Err(ExtractionError::ToolFailed {
            tool,
            path: pdf_path.display().to_string(),
            message: format!("exit status {status}: {}", stderr.trim()),
        });
    }

    Ok(stdout)
}

fn drain_pipe<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<io::Result<String>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        pipe.read_to_end(&mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    })
}

fn collect_pipe(reader: Option<JoinHandle<io::Result<String>>>) -> Result<String, ExtractionError> {
    let Some(reader) = reader else {
        return Ok(String::new());
    };
    match reader.join() {
        Ok(output) => Ok(output?),
        Err(_) => Err(ExtractionError::Io(io::Error::other("pipe reader thread panicked"))),
    }
}

fn scratch_dir() -> Result<TempDir, ExtractionError> {
    Ok(tempfile::Builder::new().prefix("pof_harvest_").tempdir()?)
}

pub(super) fn split_pages(raw: &str) -> Vec<String> {
    let mut pages = raw
        .split('\u{000C}')
        .map(|chunk| chunk.replace('\u{0000}', ""))
        .collect::<Vec<String>>();

    while let Some(last_page) = pages.last() {
        if last_page.trim().is_empty() {
            pages.pop();
            continue;
        }
        break;
    }

    pages
}
