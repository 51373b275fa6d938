//! Test doubles shared by the transcoder unit tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::io::AsyncReadExt;

use super::error::TranscoderError;
use super::metadata::{Format, Metadata};
use super::traits::Prober;
use super::types::Source;

/// Prober that returns fixed metadata and counts how often it was asked.
#[derive(Debug, Default)]
pub struct CountingProber {
    metadata: Metadata,
    calls: AtomicUsize,
}

impl CountingProber {
    pub fn with_duration(duration: &str) -> Self {
        Self {
            metadata: Metadata {
                format: Format {
                    duration: duration.to_string(),
                    ..Default::default()
                },
                streams: Vec::new(),
            },
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Prober for CountingProber {
    fn name(&self) -> &str {
        "counting"
    }

    async fn probe(&self, _source: &mut Source) -> Result<Metadata, TranscoderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.metadata.clone())
    }
}

/// Prober that reads the first bytes of a stream input, like ffprobe sniffing
/// a container header, then hands them back to the source.
#[derive(Debug)]
pub struct HeadReadingProber {
    len: usize,
    metadata: Metadata,
    head: Mutex<Vec<u8>>,
}

impl HeadReadingProber {
    pub fn new(len: usize, duration: &str) -> Self {
        Self {
            len,
            metadata: CountingProber::with_duration(duration).metadata,
            head: Mutex::new(Vec::new()),
        }
    }

    /// Bytes read during the last probe.
    pub fn head(&self) -> Vec<u8> {
        self.head.lock().unwrap().clone()
    }
}

#[async_trait]
impl Prober for HeadReadingProber {
    fn name(&self) -> &str {
        "head-reading"
    }

    async fn probe(&self, source: &mut Source) -> Result<Metadata, TranscoderError> {
        let mut head = vec![0u8; self.len];
        if let Source::Stream(reader) = &mut *source {
            reader.read_exact(&mut head).await?;
        }
        *self.head.lock().unwrap() = head.clone();
        source.replay(head);
        Ok(self.metadata.clone())
    }
}
