// SPDX-License-Identifier: MPL-2.0

pub(crate) use alloc::{
    boxed::Box,
    collections::BTreeMap,
    string::String,
    sync::{Arc, Weak},
    vec,
    vec::Vec,
};
pub(crate) use core::{fmt::Debug, ops::Range, time::Duration};

pub(crate) use align_ext::AlignExt;
pub(crate) use ostd::Pod;
pub(crate) use spin::{Mutex, Once};

pub(crate) use crate::error::{Error, Result};
