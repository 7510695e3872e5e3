//! Data sinks for finished stacks.
//!
//! The controller hands a finished [`Stack`] and a title to a sink once a
//! sweep returns. The sink decides how to make it visible or persist it; this
//! crate defines no storage format of its own.

use anyhow::Result;
use async_trait::async_trait;
use ndarray::Axis;
use tokio::sync::Mutex;
use tracing::info;

use crate::data::frame::Sample;
use crate::data::stack::Stack;

/// Receives finished stacks.
#[async_trait]
pub trait DataSink<T: Sample>: Send + Sync {
    /// Take ownership of a finished stack titled `title`.
    async fn publish(&self, title: &str, stack: Stack<T>) -> Result<()>;
}

/// Keeps every published stack in memory.
#[derive(Debug)]
pub struct MemorySink<T> {
    items: Mutex<Vec<(String, Stack<T>)>>,
}

impl<T: Sample> MemorySink<T> {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
        }
    }

    /// Titles published so far, in order.
    pub async fn titles(&self) -> Vec<String> {
        self.items
            .lock()
            .await
            .iter()
            .map(|(title, _)| title.clone())
            .collect()
    }

    /// Remove and return everything published so far.
    pub async fn take(&self) -> Vec<(String, Stack<T>)> {
        std::mem::take(&mut *self.items.lock().await)
    }
}

impl<T: Sample> Default for MemorySink<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Sample> DataSink<T> for MemorySink<T> {
    async fn publish(&self, title: &str, stack: Stack<T>) -> Result<()> {
        self.items.lock().await.push((title.to_string(), stack));
        Ok(())
    }
}

/// Reports published stacks through `tracing` and drops them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingSink;

#[async_trait]
impl<T: Sample + PartialEq> DataSink<T> for LoggingSink {
    async fn publish(&self, title: &str, stack: Stack<T>) -> Result<()> {
        let (rows, cols, frames) = stack.shape();
        let zero = T::default();
        let populated = stack
            .data()
            .axis_iter(Axis(2))
            .filter(|frame| frame.iter().any(|v| *v != zero))
            .count();
        info!(
            title,
            rows, cols, frames, populated, "Stack published (non-zero frames / slots)"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::frame::Frame;

    #[tokio::test]
    async fn test_memory_sink_records_in_order() {
        let sink = MemorySink::new();
        let frame = Frame::filled(1, 1, 1u16);
        sink.publish("first", Stack::allocate(&frame, 1)).await.unwrap();
        sink.publish("second", Stack::allocate(&frame, 2)).await.unwrap();

        assert_eq!(sink.titles().await, vec!["first", "second"]);
        let items = sink.take().await;
        assert_eq!(items[1].1.capacity(), 2);
        assert!(sink.titles().await.is_empty());
    }

    #[tokio::test]
    async fn test_logging_sink_accepts_stack() {
        let frame = Frame::filled(2, 2, 1.0f32);
        let mut stack = Stack::allocate(&frame, 3);
        stack.store(0, &frame).unwrap();
        LoggingSink.publish("EELS_data_3D", stack).await.unwrap();
    }
}
