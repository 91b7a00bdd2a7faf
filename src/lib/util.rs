// Various common functions

use std::fmt;

pub struct PrintableSlice<'a>(&'a [u8]);

impl<'a> PrintableSlice<'a> {
    pub fn new<T>(data: &'a T) -> PrintableSlice<'a>
    where
        T: ?Sized + AsRef<[u8]> + 'a,
    {
        PrintableSlice(data.as_ref())
    }
}

// Hex, followed by the printable characters
impl fmt::Display for PrintableSlice<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for byte in self.0 {
            write!(f, " {:02x}", byte)?;
        }
        write!(f, " |")?;
        for byte in self.0 {
            if *byte >= 32 && *byte < 127 {
                write!(f, "{}", *byte as char)?;
            } else {
                write!(f, ".")?;
            }
        }
        write!(f, "|]")?;
        Ok(())
    }
}

/// Normalize an angle in degrees to [0, 360).
pub fn wrap_360(deg: f64) -> f64 {
    let r = deg.rem_euclid(360.0);
    // rem_euclid of a tiny negative number can round up to exactly 360
    if r >= 360.0 { 0.0 } else { r }
}

/// Normalize to [0, 360) as an `f32` wire azimuth. Narrowing can round a
/// value just below 360 up to 360 exactly, so wrap again afterwards.
pub fn wrap_360_f32(deg: f64) -> f32 {
    let az = wrap_360(deg) as f32;
    if az >= 360.0 { 0.0 } else { az }
}

/// Signed difference `a - b` in degrees, folded into [-180, 180].
pub fn diff_deg(a: f64, b: f64) -> f64 {
    let mut diff = a - b;
    if diff > 180.0 {
        diff -= 360.0;
    } else if diff < -180.0 {
        diff += 360.0;
    }
    diff
}
