//! Audio takes, WAV files and the duplex loop

#[cfg(feature = "hardware")]
pub mod duplex;
pub mod io;
pub mod signal;
pub mod take;
pub mod wav;

#[cfg(feature = "hardware")]
pub use duplex::CpalDuplex;
pub use io::AudioIo;
pub use take::AudioTake;
pub use wav::{read_wav, write_wav};
