use std::{fmt, str};

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
/// Four character code representing a pixelformat
pub struct FourCC {
    pub repr: [u8; 4],
}

impl FourCC {
    /// Planar YUV 4:2:0, the format the loopback source negotiates by default
    pub const YU12: FourCC = FourCC { repr: *b"YU12" };

    #[allow(clippy::trivially_copy_pass_by_ref)]
    /// Returns a pixelformat as four character code
    ///
    /// # Arguments
    ///
    /// * `repr` - Four characters as raw bytes
    ///
    /// # Example
    ///
    /// ```
    /// use v4l_loopback::FourCC;
    /// let fourcc = FourCC::new(b"YUYV");
    /// ```
    pub fn new(repr: &[u8; 4]) -> FourCC {
        FourCC { repr: *repr }
    }

    /// Returns the string representation of a four character code
    pub fn str(&self) -> Result<&str, str::Utf8Error> {
        str::from_utf8(&self.repr)
    }

    /// Bits used per pixel for the formats this crate knows how to size
    ///
    /// Returns `None` for formats whose frame size cannot be derived from the geometry alone
    /// (compressed formats, mostly).
    pub fn bits_per_pixel(&self) -> Option<u32> {
        match &self.repr {
            b"YU12" | b"YV12" | b"NV12" | b"NV21" => Some(12),
            b"YUYV" | b"UYVY" | b"RGBP" => Some(16),
            b"RGB3" | b"BGR3" => Some(24),
            b"RGB4" | b"BGR4" | b"AR24" | b"XR24" => Some(32),
            b"GREY" => Some(8),
            _ => None,
        }
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Ok(string) = self.str() {
            write!(f, "{}", string)?;
        }
        Ok(())
    }
}

impl str::FromStr for FourCC {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.len() != 4 || !bytes.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
            return Err(format!("invalid four character code: {:?}", s));
        }

        let mut repr = [0u8; 4];
        repr.copy_from_slice(bytes);
        Ok(FourCC::new(&repr))
    }
}

impl From<u32> for FourCC {
    fn from(code: u32) -> Self {
        FourCC::new(&code.to_le_bytes())
    }
}

impl From<FourCC> for u32 {
    fn from(fourcc: FourCC) -> Self {
        Self::from_le_bytes(fourcc.repr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_matches_kernel_encoding() {
        // V4L2_PIX_FMT_YUV420
        assert_eq!(u32::from(FourCC::YU12), 0x3231_5559);
        assert_eq!(FourCC::from(0x3231_5559), FourCC::YU12);
    }

    #[test]
    fn parse() {
        assert_eq!("YUYV".parse::<FourCC>().unwrap(), FourCC::new(b"YUYV"));
        assert!("YUV".parse::<FourCC>().is_err());
        assert!("YUYV2".parse::<FourCC>().is_err());
    }

    #[test]
    fn frame_depth() {
        assert_eq!(FourCC::YU12.bits_per_pixel(), Some(12));
        assert_eq!(FourCC::new(b"MJPG").bits_per_pixel(), None);
    }
}
