use super::*;
use crate::item::SenderQueueItem;
use crate::key::{KeyAllocator, QueueKey};
use crate::pipeline::PipelineContext;

mod common;
use common::*;
