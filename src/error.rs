use thiserror::Error;

use crate::graph::{BufferUsage, Op};

/// Fatal compilation failures.
///
/// Every variant indicates an invalid graph or an invalid configuration, not
/// a transient condition: a compile pass either runs to completion or aborts
/// with one of these. After an aborted pass the context's cache state is
/// undefined and callers should invalidate before reuse.
#[derive(Error, Debug)]
pub enum CompileError {
    #[error("host evaluation and device data transformation are mutually exclusive")]
    InvalidOptions,

    #[error("root expression already registered for this consumer")]
    DuplicateRegistration,

    #[error("diverging usage for shared buffer: {first:?} vs {second:?}")]
    DivergingBufferUsage {
        first: BufferUsage,
        second: BufferUsage,
    },

    #[error("typed buffer wrapper carries no underlying raw buffer")]
    MalformedBufferWrapper,

    #[error("unexpected consumer operation for mesh device transformation: {0:?}")]
    UnexpectedSampleOperation(Op),

    #[error("skinned mesh consumer {0:?} does not select a sampling frame")]
    MissingFrameCapability(Op),

    #[error("mesh sampling consumer carries no usable channel descriptor: {0:?}")]
    InvalidChannelDescriptor(Op),

    #[error("attribute read patching requested but no event attribute layout was supplied")]
    MissingEventLayout,

    #[error("unable to resolve attribute {0:?} in the event attribute layout")]
    UnresolvedEventAttribute(String),

    #[error("evaluation failed: {0}")]
    Evaluation(String),
}

pub type Result<T> = std::result::Result<T, CompileError>;
