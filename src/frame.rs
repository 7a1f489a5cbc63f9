//! Transport-side frame representation.
//!
//! Frames arrive from the video transport as I420: a full-resolution luma
//! plane and two chroma planes subsampled by two in each axis. Every plane
//! carries its own stride, which may exceed the visible row width.

/// Rotation metadata attached to a transport frame, clockwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn from_degrees(degrees: i32) -> Option<Self> {
        match degrees.rem_euclid(360) {
            0 => Some(Self::Deg0),
            90 => Some(Self::Deg90),
            180 => Some(Self::Deg180),
            270 => Some(Self::Deg270),
            _ => None,
        }
    }

    pub fn degrees(self) -> i32 {
        match self {
            Self::Deg0 => 0,
            Self::Deg90 => 90,
            Self::Deg180 => 180,
            Self::Deg270 => 270,
        }
    }

    /// True when applying this rotation swaps width and height.
    pub fn swaps_axes(self) -> bool {
        matches!(self, Self::Deg90 | Self::Deg270)
    }
}

/// One sample plane with its row stride in bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plane {
    pub data: Vec<u8>,
    pub stride: usize,
}

impl Plane {
    pub fn new(data: Vec<u8>, stride: usize) -> Self {
        Self { data, stride }
    }

    /// Whether `rows` rows of `width` visible bytes fit this plane's stride
    /// and buffer. The last row needs no trailing padding.
    pub fn fits(&self, width: usize, rows: usize) -> bool {
        if rows == 0 || width == 0 {
            return true;
        }
        self.stride >= width && self.data.len() >= self.stride * (rows - 1) + width
    }

    /// Visible bytes of row `y`, without stride padding.
    ///
    /// # Panics
    ///
    /// If the row lies outside the buffer; check with [`Plane::fits`] first.
    pub fn row(&self, y: usize, width: usize) -> &[u8] {
        let start = y * self.stride;
        &self.data[start..start + width]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Planes {
    y: Plane,
    u: Plane,
    v: Plane,
}

/// An I420 picture at a timestamp.
///
/// The frame exclusively owns its planes. `release` frees them early and is
/// idempotent; a released frame refuses conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct I420Frame {
    width: u32,
    height: u32,
    timestamp_ns: i64,
    rotation: Rotation,
    planes: Option<Planes>,
}

impl I420Frame {
    pub fn new(
        width: u32,
        height: u32,
        timestamp_ns: i64,
        rotation: Rotation,
        y: Plane,
        u: Plane,
        v: Plane,
    ) -> Self {
        Self {
            width,
            height,
            timestamp_ns,
            rotation,
            planes: Some(Planes { y, u, v }),
        }
    }

    /// Build a tightly packed frame where every plane is filled with one value.
    pub fn solid(width: u32, height: u32, timestamp_ns: i64, yuv: (u8, u8, u8)) -> Self {
        let (cw, ch) = chroma_dimensions(width, height);
        let luma = vec![yuv.0; width as usize * height as usize];
        let u = vec![yuv.1; cw * ch];
        let v = vec![yuv.2; cw * ch];
        Self::new(
            width,
            height,
            timestamp_ns,
            Rotation::Deg0,
            Plane::new(luma, width as usize),
            Plane::new(u, cw),
            Plane::new(v, cw),
        )
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn timestamp_ns(&self) -> i64 {
        self.timestamp_ns
    }

    pub fn rotation(&self) -> Rotation {
        self.rotation
    }

    /// The same picture stamped with a different timestamp.
    pub fn with_timestamp(mut self, timestamp_ns: i64) -> Self {
        self.timestamp_ns = timestamp_ns;
        self
    }

    pub fn y(&self) -> Option<&Plane> {
        self.planes.as_ref().map(|p| &p.y)
    }

    pub fn u(&self) -> Option<&Plane> {
        self.planes.as_ref().map(|p| &p.u)
    }

    pub fn v(&self) -> Option<&Plane> {
        self.planes.as_ref().map(|p| &p.v)
    }

    pub fn is_released(&self) -> bool {
        self.planes.is_none()
    }

    /// Drop the backing planes. Releasing twice is a no-op.
    pub fn release(&mut self) {
        if self.planes.take().is_some() {
            tracing::trace!(ts = self.timestamp_ns, "released frame buffers");
        }
    }
}

/// Chroma plane dimensions for a 4:2:0 picture; odd sizes round up.
pub fn chroma_dimensions(width: u32, height: u32) -> (usize, usize) {
    (width.div_ceil(2) as usize, height.div_ceil(2) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fits_checks_stride_and_length() {
        let plane = Plane::new(vec![0; 10], 4);
        assert!(plane.fits(4, 3));
        assert!(plane.fits(2, 3));
        assert!(!plane.fits(4, 4));
        assert!(!plane.fits(5, 1));
        assert!(Plane::new(Vec::new(), 0).fits(0, 0));
    }

    #[test]
    fn rotation_parses_multiples_of_ninety() {
        assert_eq!(Rotation::from_degrees(-90), Some(Rotation::Deg270));
        assert_eq!(Rotation::from_degrees(450), Some(Rotation::Deg90));
        assert_eq!(Rotation::from_degrees(45), None);
        assert!(Rotation::Deg270.swaps_axes());
        assert!(!Rotation::Deg180.swaps_axes());
    }

    #[test]
    fn release_is_idempotent() {
        let mut frame = I420Frame::solid(4, 4, 0, (16, 128, 128));
        assert!(!frame.is_released());
        frame.release();
        frame.release();
        assert!(frame.is_released());
        assert!(frame.y().is_none());
    }

    #[test]
    fn odd_dimensions_round_chroma_up() {
        assert_eq!(chroma_dimensions(5, 3), (3, 2));
        let frame = I420Frame::solid(5, 3, 0, (16, 128, 128));
        assert_eq!(frame.u().map(|p| p.data.len()), Some(6));
    }
}
