//! Writes a volume buffer to disk as one PNG per depth layer.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use image::RgbImage;
use tracing::info;

use crate::error::ExportError;
use crate::types::VolumeDims;

pub struct VolumeExporter;

impl VolumeExporter {
    /// Interprets `bytes` as little-endian `f32` voxels laid out x-fastest,
    /// then y, then z, with `channels` values per voxel. Each depth layer is
    /// written to `dir/NNNN.png` as 8-bit RGB: values are scaled by 255 and
    /// clamped, channels past the third are dropped, and single-channel data
    /// is replicated to grey.
    pub fn export(
        dir: &Path,
        bytes: &[u8],
        dims: VolumeDims,
        channels: u32,
    ) -> Result<Vec<PathBuf>, ExportError> {
        if channels == 0 {
            return Err(ExportError::NoChannels);
        }
        let expected = dims.byte_size(channels);
        if bytes.len() as u64 != expected {
            return Err(ExportError::SizeMismatch {
                dims,
                channels,
                expected,
                actual: bytes.len() as u64,
            });
        }

        std::fs::create_dir_all(dir).map_err(|source| ExportError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let channels = channels as usize;
        let layer_values = dims.width as usize * dims.height as usize * channels;
        let values: Vec<u8> = bytes
            .chunks_exact(4)
            .map(|chunk| to_unorm8(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])))
            .collect();

        let mut written = Vec::with_capacity(dims.depth as usize);
        for (layer, voxels) in values.chunks_exact(layer_values.max(1)).enumerate() {
            let rgb: Vec<u8> = voxels
                .chunks_exact(channels)
                .flat_map(|voxel| to_rgb(voxel))
                .collect();
            let path = dir.join(format!("{layer:04}.png"));
            let image = RgbImage::from_raw(dims.width, dims.height, rgb).ok_or(
                ExportError::SizeMismatch {
                    dims,
                    channels: channels as u32,
                    expected,
                    actual: bytes.len() as u64,
                },
            )?;
            image.save(&path).map_err(|source| ExportError::Encode {
                path: path.clone(),
                source,
            })?;
            written.push(path);
        }

        info!(dir = %dir.display(), layers = written.len(), %dims, "exported volume slices");
        Ok(written)
    }

    /// Subdirectory of `root` named after `now`, e.g. `volume-20240131-235959`.
    pub fn timestamped_dir(root: &Path, now: DateTime<Local>) -> PathBuf {
        root.join(format!("volume-{}", now.format("%Y%m%d-%H%M%S")))
    }
}

fn to_unorm8(value: f32) -> u8 {
    if value.is_nan() {
        return 0;
    }
    (value * 255.0).clamp(0.0, 255.0) as u8
}

fn to_rgb(voxel: &[u8]) -> [u8; 3] {
    match *voxel {
        [grey] => [grey; 3],
        [r, g] => [r, g, 0],
        [r, g, b, ..] => [r, g, b],
        [] => [0; 3],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn floats(values: &[f32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn all_ones_export_white_slices() {
        let dir = TempDir::new().unwrap();
        let dims = VolumeDims::new(4, 2, 3);
        let bytes = floats(&vec![1.0; dims.voxel_count() as usize * 4]);

        let written = VolumeExporter::export(dir.path(), &bytes, dims, 4).unwrap();

        assert_eq!(written.len(), 3);
        assert_eq!(written[2], dir.path().join("0002.png"));
        for path in &written {
            let image = image::open(path).unwrap().to_rgb8();
            assert_eq!(image.dimensions(), (4, 2));
            assert!(image.pixels().all(|pixel| pixel.0 == [255, 255, 255]));
        }
    }

    #[test]
    fn single_channel_becomes_grey_and_values_clamp() {
        let dir = TempDir::new().unwrap();
        let dims = VolumeDims::new(3, 1, 1);
        let bytes = floats(&[0.5, -2.0, 7.0]);

        let written = VolumeExporter::export(dir.path(), &bytes, dims, 1).unwrap();

        let image = image::open(&written[0]).unwrap().to_rgb8();
        assert_eq!(image.get_pixel(0, 0).0, [127, 127, 127]);
        assert_eq!(image.get_pixel(1, 0).0, [0, 0, 0]);
        assert_eq!(image.get_pixel(2, 0).0, [255, 255, 255]);
    }

    #[test]
    fn layers_follow_depth_order() {
        let dir = TempDir::new().unwrap();
        let dims = VolumeDims::new(1, 1, 2);
        let bytes = floats(&[1.0, 0.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0]);

        let written = VolumeExporter::export(dir.path(), &bytes, dims, 4).unwrap();

        let first = image::open(&written[0]).unwrap().to_rgb8();
        let second = image::open(&written[1]).unwrap().to_rgb8();
        assert_eq!(first.get_pixel(0, 0).0, [255, 0, 0]);
        assert_eq!(second.get_pixel(0, 0).0, [0, 255, 0]);
    }

    #[test]
    fn rejects_mismatched_sizes() {
        let dir = TempDir::new().unwrap();
        let err = VolumeExporter::export(dir.path(), &[0; 12], VolumeDims::cube(2), 1).unwrap_err();
        assert!(matches!(
            err,
            ExportError::SizeMismatch {
                expected: 32,
                actual: 12,
                ..
            }
        ));
        assert!(matches!(
            VolumeExporter::export(dir.path(), &[], VolumeDims::cube(2), 0),
            Err(ExportError::NoChannels)
        ));
    }

    #[test]
    fn timestamped_directory_name() {
        let now = Local.with_ymd_and_hms(2024, 1, 31, 23, 59, 58).unwrap();
        assert_eq!(
            VolumeExporter::timestamped_dir(Path::new("/tmp/out"), now),
            PathBuf::from("/tmp/out/volume-20240131-235958")
        );
    }
}
