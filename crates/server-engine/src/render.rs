//! PDF page rendering seam.
//!
//! The conversion engine is an external collaborator; workers only depend on
//! the [`PdfRenderer`] trait so tests can substitute an in-memory
//! implementation. The production implementation shells out to poppler
//! (`pdfinfo` + `pdftoppm`).

use std::path::Path;
use std::process::Command;

use anyhow::Context as _;

/// Renders every page of a PDF into per-page PNG files.
pub trait PdfRenderer: Send + Sync {
    /// Render `pdf_path` into `out_dir` as `image-NN.png` (zero-based, two
    /// digits), using up to `thread_hint` parallel conversions. Returns the
    /// number of pages written. `out_dir` is created by the renderer.
    fn render(&self, pdf_path: &Path, out_dir: &Path, thread_hint: usize)
    -> anyhow::Result<usize>;
}

/// Poppler-backed renderer. The page range is split into up to `thread_hint`
/// contiguous chunks, each handed to its own `pdftoppm` child process.
#[derive(Debug, Clone, Copy, Default)]
pub struct PopplerRenderer;

impl PopplerRenderer {
    fn page_count(pdf_path: &Path) -> anyhow::Result<usize> {
        let out = Command::new("pdfinfo")
            .arg(pdf_path)
            .output()
            .context("spawn pdfinfo")?;
        if !out.status.success() {
            anyhow::bail!(
                "pdfinfo failed for {}: {}",
                pdf_path.display(),
                String::from_utf8_lossy(&out.stderr).trim()
            );
        }
        let stdout = String::from_utf8_lossy(&out.stdout);
        for line in stdout.lines() {
            if let Some(rest) = line.strip_prefix("Pages:") {
                return rest
                    .trim()
                    .parse()
                    .context("parse page count from pdfinfo");
            }
        }
        anyhow::bail!("pdfinfo output missing page count")
    }
}

impl PdfRenderer for PopplerRenderer {
    fn render(
        &self,
        pdf_path: &Path,
        out_dir: &Path,
        thread_hint: usize,
    ) -> anyhow::Result<usize> {
        let pages = Self::page_count(pdf_path)?;
        if pages == 0 {
            return Ok(0);
        }
        std::fs::create_dir_all(out_dir)
            .with_context(|| format!("create output dir {}", out_dir.display()))?;

        let mut children = Vec::new();
        for (first, last) in page_chunks(pages, thread_hint) {
            // -forcenum keeps the page-number suffix even when a chunk covers
            // a single page; pdftoppm would otherwise emit a bare `page.png`.
            let child = Command::new("pdftoppm")
                .arg("-png")
                .arg("-forcenum")
                .arg("-r")
                .arg("150")
                .arg("-f")
                .arg(first.to_string())
                .arg("-l")
                .arg(last.to_string())
                .arg(pdf_path)
                .arg(out_dir.join("page"))
                .spawn()
                .context("spawn pdftoppm")?;
            children.push(child);
        }
        for mut child in children {
            let status = child.wait().context("wait for pdftoppm")?;
            if !status.success() {
                anyhow::bail!("pdftoppm exited with {status}");
            }
        }

        rename_pages(out_dir, pages)?;
        Ok(pages)
    }
}

/// Split `1..=pages` into at most `threads` contiguous chunks.
fn page_chunks(pages: usize, threads: usize) -> Vec<(usize, usize)> {
    let threads = threads.clamp(1, pages);
    let chunk = pages.div_ceil(threads);
    let mut out = Vec::new();
    let mut first = 1;
    while first <= pages {
        let last = (first + chunk - 1).min(pages);
        out.push((first, last));
        first = last + 1;
    }
    out
}

/// Normalise `pdftoppm` output (`page-N.png`, padding dependent on the
/// document) to the `image-NN.png` contract, zero-based and two-digit.
fn rename_pages(out_dir: &Path, pages: usize) -> anyhow::Result<usize> {
    let mut renamed = 0;
    for entry in std::fs::read_dir(out_dir).context("list rendered pages")? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(page) = name
            .strip_prefix("page-")
            .and_then(|rest| rest.strip_suffix(".png"))
            .and_then(|n| n.parse::<usize>().ok())
        else {
            continue;
        };
        if page == 0 || page > pages {
            anyhow::bail!("unexpected rendered page {name} (document has {pages})");
        }
        let target = out_dir.join(format!("image-{:02}.png", page - 1));
        std::fs::rename(entry.path(), &target)
            .with_context(|| format!("rename {name} to {}", target.display()))?;
        renamed += 1;
    }
    if renamed != pages {
        anyhow::bail!("rendered {renamed} pages, expected {pages}");
    }
    Ok(renamed)
}
