use std::fs::File;
use std::io::Write;
use std::path::Path;

use anyhow::{bail, Context, Result};
use image::imageops::{self, FilterType};
use v4l::video::Output;
use v4l::{Device, FourCC};

use super::OutputSink;
use crate::convert;
use crate::frame::{chroma_dimensions, I420Frame, Plane, Rotation};

/// Writes I420 (`YU12`) frames to a v4l2loopback device.
pub struct V4L2Output {
    // Kept open so the negotiated format sticks.
    _device: Device,
    file: File,
    width: u32,
    height: u32,
    packed: Vec<u8>,
}

impl V4L2Output {
    pub fn new<P: AsRef<Path>>(device_path: P, width: u32, height: u32) -> Result<Self> {
        let path = device_path.as_ref();
        tracing::info!(
            "Opening v4l2loopback device at {} ({}x{})",
            path.display(),
            width,
            height
        );

        let device = Device::with_path(path)
            .with_context(|| format!("Failed to open v4l2 device at {}", path.display()))?;
        let mut format = Output::format(&device).context("Failed to query output format")?;
        format.width = width;
        format.height = height;
        format.fourcc = FourCC::new(b"YU12");
        match Output::set_format(&device, &format) {
            Ok(actual) if actual.fourcc != format.fourcc => {
                tracing::warn!("Loopback device negotiated {} instead of YU12", actual.fourcc);
            }
            Ok(_) => {}
            Err(err) => tracing::warn!("Could not set loopback format, writing anyway: {err}"),
        }

        let file = File::options()
            .write(true)
            .open(path)
            .with_context(|| format!("Failed to open v4l2loopback device at {}", path.display()))?;

        Ok(Self {
            _device: device,
            file,
            width,
            height,
            packed: Vec::new(),
        })
    }

    /// Apply pending rotation and scale to the device size.
    fn normalize(&self, frame: &I420Frame) -> Result<I420Frame> {
        let rgba = convert::to_packed(frame).context("Failed to unpack frame")?;
        let upright = convert::apply_rotation(rgba, frame.rotation());
        let scaled = if upright.dimensions() == (self.width, self.height) {
            upright
        } else {
            imageops::resize(&upright, self.width, self.height, FilterType::Triangle)
        };
        convert::to_planar(&scaled, frame.timestamp_ns(), Rotation::Deg0)
            .context("Failed to repack frame")
    }

}

/// Copy the visible bytes of each plane into `out`, Y then U then V, with
/// stride padding removed.
fn pack_planes(frame: &I420Frame, out: &mut Vec<u8>) -> Result<()> {
    let (width, height) = frame.dimensions();
    let (chroma_w, chroma_h) = chroma_dimensions(width, height);

    out.clear();
    let planes = [
        ("Y", frame.y(), width as usize, height as usize),
        ("U", frame.u(), chroma_w, chroma_h),
        ("V", frame.v(), chroma_w, chroma_h),
    ];
    for (name, plane, row_width, rows) in planes {
        let plane: &Plane = plane.context("Frame buffer was released")?;
        if !plane.fits(row_width, rows) {
            bail!(
                "{name} plane ({} bytes, stride {}) is too small for {rows} rows of {row_width}",
                plane.data.len(),
                plane.stride
            );
        }
        for y in 0..rows {
            out.extend_from_slice(plane.row(y, row_width));
        }
    }
    Ok(())
}

impl OutputSink for V4L2Output {
    fn write_frame(&mut self, frame: &I420Frame) -> Result<()> {
        let normalized;
        let frame = if frame.rotation() != Rotation::Deg0
            || frame.dimensions() != (self.width, self.height)
        {
            normalized = self.normalize(frame)?;
            &normalized
        } else {
            frame
        };

        pack_planes(frame, &mut self.packed)?;
        self.file
            .write_all(&self.packed)
            .context("Failed to write frame to v4l2loopback device")?;
        Ok(())
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packing_strips_stride_padding() {
        let frame = I420Frame::new(
            2,
            2,
            0,
            Rotation::Deg0,
            Plane::new(vec![1, 2, 0, 0, 3, 4], 4),
            Plane::new(vec![5, 0], 2),
            Plane::new(vec![6], 1),
        );
        let mut out = Vec::new();
        pack_planes(&frame, &mut out).unwrap();
        assert_eq!(out, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn short_planes_are_rejected_instead_of_panicking() {
        let frame = I420Frame::new(
            4,
            4,
            0,
            Rotation::Deg0,
            Plane::new(vec![0; 10], 4),
            Plane::new(vec![0; 4], 2),
            Plane::new(vec![0; 4], 2),
        );
        let mut out = Vec::new();
        let err = pack_planes(&frame, &mut out).unwrap_err();
        assert!(err.to_string().contains("Y plane"));

        let mut released = I420Frame::solid(2, 2, 0, (16, 128, 128));
        released.release();
        assert!(pack_planes(&released, &mut out).is_err());
    }
}
