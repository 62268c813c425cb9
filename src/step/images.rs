use std::fs;
use std::io::Cursor;
use std::time::Instant;

use anyhow::Context as _;
use camino::Utf8Path;
use image::ImageFormat;
use image::codecs::jpeg::JpegEncoder;
use indicatif::ParallelProgressIterator;
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};

use crate::TaskContext;
use crate::select::FileSet;
use crate::utils::as_overhead;

const IMAGE_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "gif", "svg", "ico"];

const JPEG_QUALITY: u8 = 80;

/// Optimizes source images into `assets/img`, narrowed incrementally.
///
/// PNG and JPEG files are re-encoded with the `image` crate and the smaller
/// of the original and the re-encoded bytes wins; animated or vector formats
/// (GIF, SVG, ICO) pass through untouched. A failure on one image is
/// reported and the batch continues.
pub(crate) fn optimize(ctx: &TaskContext) -> anyhow::Result<()> {
    let s = Instant::now();
    let layout = ctx.layout();
    let set = FileSet::new(&layout.images, [layout.image_glob()]);

    let files: Vec<_> = set
        .resolve_since(ctx.last_run())?
        .into_iter()
        .filter(|file| {
            file.extension()
                .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        })
        .collect();

    let out_dir = layout.img_dir();
    fs::create_dir_all(&out_dir)?;

    let optimized: usize = files
        .par_iter()
        .progress_count(files.len() as u64)
        .map(|file| {
            let result = optimize_one(file, set.base(), &out_dir);
            match result {
                Ok(()) => 1,
                Err(err) => {
                    tracing::error!("image {file} failed:\n{err:#}");
                    0
                }
            }
        })
        .sum();

    tracing::info!(
        "optimized {optimized}/{} images {}",
        files.len(),
        as_overhead(s)
    );
    Ok(())
}

fn optimize_one(file: &Utf8Path, base: &Utf8Path, out_dir: &Utf8Path) -> anyhow::Result<()> {
    let rel = file.strip_prefix(base).unwrap_or(file);
    let dest = out_dir.join(rel);

    if let Some(dir) = dest.parent() {
        fs::create_dir_all(dir)?;
    }

    let ext = file
        .extension()
        .map(str::to_lowercase)
        .unwrap_or_default();

    let encoded = match ext.as_str() {
        "png" | "jpg" | "jpeg" => {
            let original = fs::read(file)?;
            reencode(&original, &ext)
                .map(|bytes| if bytes.len() < original.len() { bytes } else { original })
        }
        // GIF frames and vector formats are copied verbatim.
        _ => {
            fs::copy(file, &dest)?;
            return Ok(());
        }
    }?;

    fs::write(&dest, encoded).with_context(|| format!("couldn't write {dest}"))?;
    Ok(())
}

fn reencode(buffer: &[u8], ext: &str) -> anyhow::Result<Vec<u8>> {
    let img = image::load_from_memory(buffer).context("couldn't decode image")?;
    let mut out = Vec::new();

    match ext {
        "png" => img.write_to(&mut Cursor::new(&mut out), ImageFormat::Png)?,
        _ => {
            let encoder = JpegEncoder::new_with_quality(Cursor::new(&mut out), JPEG_QUALITY);
            img.write_with_encoder(encoder)?;
        }
    }

    Ok(out)
}

#[cfg(test)]
mod test {
    use camino::Utf8PathBuf;
    use image::{DynamicImage, RgbImage};

    use super::*;
    use crate::core::{Environment, Mode, RunStamps};
    use crate::layout::Layout;

    fn env_at(root: &Utf8Path) -> Environment {
        Environment {
            generator: "kumade",
            mode: Mode::Build,
            port: None,
            layout: Layout::rooted(root),
            stamps: RunStamps::new(),
        }
    }

    #[test]
    fn test_optimize_preserves_tree_and_formats() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(tmp.path().to_path_buf()).unwrap();
        let env = env_at(&root);

        let img_root = &env.layout.images;
        fs::create_dir_all(img_root.join("icons")).unwrap();

        let png = DynamicImage::ImageRgb8(RgbImage::new(4, 4));
        png.save(img_root.join("photo.png").as_std_path()).unwrap();
        fs::write(img_root.join("icons/logo.svg"), "<svg></svg>").unwrap();
        fs::write(img_root.join("notes.txt"), "not an image").unwrap();

        let ctx = TaskContext { env: &env, task: "images" };
        optimize(&ctx).unwrap();

        let out = env.layout.img_dir();
        assert!(out.join("photo.png").is_file());
        assert_eq!(
            fs::read_to_string(out.join("icons/logo.svg")).unwrap(),
            "<svg></svg>"
        );
        assert!(!out.join("notes.txt").exists());
    }

    #[test]
    fn test_reencode_roundtrip() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(8, 8));
        let mut png = Vec::new();
        img.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .unwrap();

        let out = reencode(&png, "png").unwrap();
        assert!(image::load_from_memory(&out).is_ok());
    }
}
