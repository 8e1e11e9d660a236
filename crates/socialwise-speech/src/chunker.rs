//! Audio framing.
//!
//! A buffer is split into contiguous pieces of at most `max_frame_bytes`.
//! The first piece is tagged [`FrameStatus::Start`], the last
//! [`FrameStatus::End`], everything between [`FrameStatus::Continue`].
//! START and END never share a frame: a buffer that fits in one piece yields
//! `[Start(payload), End(empty)]`, and an empty buffer yields
//! `[Start(empty), End(empty)]`.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SpeechError};

/// Lifecycle tag carried by every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameStatus {
    Start,
    Continue,
    End,
}

impl FrameStatus {
    /// Value of `data.status` on the wire.
    pub fn code(self) -> u8 {
        match self {
            Self::Start => 0,
            Self::Continue => 1,
            Self::End => 2,
        }
    }
}

/// One bounded unit of outbound audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub sequence_index: u64,
    pub payload: Vec<u8>,
    pub status: FrameStatus,
}

impl AudioFrame {
    pub fn is_end(&self) -> bool {
        self.status == FrameStatus::End
    }
}

/// Lazy frame sequence over a borrowed buffer. Restartable by calling [`frames`] again.
#[derive(Debug, Clone)]
pub struct Frames<'a> {
    buffer: &'a [u8],
    max_frame_bytes: usize,
    offset: usize,
    next_index: u64,
    done: bool,
}

impl Iterator for Frames<'_> {
    type Item = AudioFrame;

    fn next(&mut self) -> Option<AudioFrame> {
        if self.done {
            return None;
        }
        let index = self.next_index;
        self.next_index += 1;

        let remaining = self.buffer.len() - self.offset;
        let take = remaining.min(self.max_frame_bytes);
        let payload = self.buffer[self.offset..self.offset + take].to_vec();
        self.offset += take;

        let status = if index == 0 {
            FrameStatus::Start
        } else if self.offset == self.buffer.len() {
            self.done = true;
            FrameStatus::End
        } else {
            FrameStatus::Continue
        };

        Some(AudioFrame {
            sequence_index: index,
            payload,
            status,
        })
    }
}

/// Frame `buffer` lazily. Fails with `InvalidInput` when `max_frame_bytes` is zero.
pub fn frames(buffer: &[u8], max_frame_bytes: usize) -> Result<Frames<'_>> {
    if max_frame_bytes == 0 {
        return Err(SpeechError::InvalidInput(
            "max_frame_bytes must be greater than zero".into(),
        ));
    }
    Ok(Frames {
        buffer,
        max_frame_bytes,
        offset: 0,
        next_index: 0,
        done: false,
    })
}

/// Split `buffer` into an ordered, fully materialized frame sequence.
pub fn chunk(buffer: &[u8], max_frame_bytes: usize) -> Result<Vec<AudioFrame>> {
    Ok(frames(buffer, max_frame_bytes)?.collect())
}
