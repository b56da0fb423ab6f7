use super::convention::Term;
use std::fmt;
use std::io;

// Everything the emulated machine itself does is infallible - real hardware has no error path, reads of
// unmapped memory simply return 0xff. Errors therefore only exist at the host boundary: loading a rom,
// loading a boot image and persisting battery ram.
#[derive(Debug)]
pub enum CoreError {
    // The rom file could not be read, is smaller than the 0x0150 byte header area, or its header
    // checksum does not match the bytes at 0x0134..0x014d.
    BadRom(String),
    // The mapper byte at 0x0147 names a bank controller this core does not implement.
    UnsupportedMapper(u8),
    // The boot image has the wrong size for the selected console type.
    BadBootImage { term: Term, len: usize },
    // Battery ram could not be persisted. Non-fatal: report and continue.
    SaveIo(io::Error),
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::BadRom(reason) => write!(f, "bad rom: {}", reason),
            CoreError::UnsupportedMapper(n) => write!(f, "unsupported mapper: 0x{:02x}", n),
            CoreError::BadBootImage { term, len } => {
                write!(f, "boot image of {} bytes does not fit console type {:?}", len, term)
            }
            CoreError::SaveIo(err) => write!(f, "save failed: {}", err),
        }
    }
}

impl std::error::Error for CoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CoreError::SaveIo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for CoreError {
    fn from(err: io::Error) -> Self {
        CoreError::SaveIo(err)
    }
}
