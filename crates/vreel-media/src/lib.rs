//! Media compiler boundary and download helpers.
//!
//! The pipeline treats compilation as a black box: ordered clips plus
//! one audio track in, one encoded video plus a thumbnail out. The
//! FFmpeg implementation lives behind the [`MediaCompiler`] trait so
//! tests can substitute a stub.

pub mod compiler;
pub mod download;
pub mod error;

pub use compiler::{CompileRequest, CompiledVideo, FfmpegCompiler, MediaCompiler};
pub use download::download_file;
pub use error::{MediaError, MediaResult};
