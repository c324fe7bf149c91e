pub(crate) use crate::config::*;
pub(crate) use crate::error::*;
pub(crate) use crate::types::*;
