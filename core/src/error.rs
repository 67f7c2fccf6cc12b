use std::fmt;

use primitive_types::U256;

/// Internal inconsistency detected while optimising.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptimizerViolation {
    /// The same tag was replaced by two different deduplication rounds.
    ReplacementAlreadyKnown { tag: usize },
    /// The peephole fixed point was not reached within the configured ceiling.
    PeepholeStuck { iterations: usize },
    /// A replacement map maps a tag onto itself or forms a cycle.
    InvalidTagReplacement { from: usize, to: usize },
}

impl fmt::Display for OptimizerViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptimizerViolation::ReplacementAlreadyKnown { tag } => {
                write!(f, "replacement for tag {tag} already known")
            }
            OptimizerViolation::PeepholeStuck { iterations } => {
                write!(f, "peephole optimiser seems to be stuck after {iterations} iterations")
            }
            OptimizerViolation::InvalidTagReplacement { from, to } => {
                write!(f, "invalid tag replacement {from} -> {to}")
            }
        }
    }
}

/// Structural error found while laying out bytecode (or while mutating a frozen assembly).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssemblyViolation {
    DuplicateTagPosition { tag: usize },
    /// Tag id 0 is reserved for the invalid jump destination.
    InvalidTag,
    TagTooLarge { tag: usize, position: usize, width: usize },
    ReferenceToMissingTag { sub: Option<usize>, tag: usize },
    TagWithoutPosition { sub: Option<usize>, tag: usize },
    InvalidSubId { sub: usize, subs: usize },
    ImmutableReadWriteConflict,
    MultipleSubsReferenceImmutables,
    ImmutableReadButNeverAssigned { name: String },
    ImmutableAssignedButNeverRead { name: String },
    UnknownDataKey { key: U256 },
    UnknownTableKey { key: U256 },
    AlreadyAssembled,
    EmptyTagName,
}

impl fmt::Display for AssemblyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssemblyViolation::DuplicateTagPosition { tag } => write!(f, "duplicate position for tag {tag}"),
            AssemblyViolation::InvalidTag => write!(f, "tag 0 cannot be placed"),
            AssemblyViolation::TagTooLarge { tag, position, width } => {
                write!(f, "position {position} of tag {tag} does not fit into {width} bytes")
            }
            AssemblyViolation::ReferenceToMissingTag { sub, tag } => match sub {
                Some(sub) => write!(f, "reference to non-existing tag {tag} in sub {sub}"),
                None => write!(f, "reference to non-existing tag {tag}"),
            },
            AssemblyViolation::TagWithoutPosition { sub, tag } => match sub {
                Some(sub) => write!(f, "reference to tag {tag} in sub {sub} without position"),
                None => write!(f, "reference to tag {tag} without position"),
            },
            AssemblyViolation::InvalidSubId { sub, subs } => {
                write!(f, "invalid sub id {sub} (assembly has {subs} subs)")
            }
            AssemblyViolation::ImmutableReadWriteConflict => {
                write!(f, "cannot push and assign immutables in the same assembly")
            }
            AssemblyViolation::MultipleSubsReferenceImmutables => {
                write!(f, "more than one sub-assembly references immutables")
            }
            AssemblyViolation::ImmutableReadButNeverAssigned { name } => {
                write!(f, "immutable '{name}' is read but never assigned")
            }
            AssemblyViolation::ImmutableAssignedButNeverRead { name } => {
                write!(f, "immutable '{name}' is assigned but no sub-assembly declares it")
            }
            AssemblyViolation::UnknownDataKey { key } => write!(f, "no data registered under key 0x{key:x}"),
            AssemblyViolation::UnknownTableKey { key } => write!(f, "no table entry for key 0x{key:x}"),
            AssemblyViolation::AlreadyAssembled => write!(f, "assembly was already assembled and is frozen"),
            AssemblyViolation::EmptyTagName => write!(f, "empty named tag"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssemblyError {
    /// Appending an item would take the running stack height below zero.
    StackUnderflow { deposit: i64, item: String },
    Optimizer(OptimizerViolation),
    Assembly(AssemblyViolation),
}

impl fmt::Display for AssemblyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssemblyError::StackUnderflow { deposit, item } => {
                write!(f, "stack underflow: appending '{item}' at height {deposit}")
            }
            AssemblyError::Optimizer(v) => write!(f, "optimizer invariant violated: {v}"),
            AssemblyError::Assembly(v) => write!(f, "assembly invariant violated: {v}"),
        }
    }
}

impl std::error::Error for AssemblyError {}

impl From<OptimizerViolation> for AssemblyError {
    fn from(value: OptimizerViolation) -> Self {
        AssemblyError::Optimizer(value)
    }
}

impl From<AssemblyViolation> for AssemblyError {
    fn from(value: AssemblyViolation) -> Self {
        AssemblyError::Assembly(value)
    }
}

pub type AsmResult<T> = Result<T, AssemblyError>;
