//! Patch model and device codec
//!
//! - `model`: typed patch schema with JSON storage
//! - `table`: address, width and scaling of every device field
//! - `codec`: SysEx encode/decode, bulk dumps and dump requests

pub mod codec;
pub mod model;
pub mod table;

pub use codec::{concat, decode_frame, DecodedFrame, Frame, PatchCodec, PatchImage};
pub use model::{ParamValue, ParameterChange, Patch, PatchMeta, Section, SectionId};
pub use table::{Address, Field, FieldSpec, Region, Scaling};
