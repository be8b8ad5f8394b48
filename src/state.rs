use crate::assembler::{Event, PartAssembler};
use crate::buffer::StreamBuffer;
use std::task::{Context, Poll, Waker};

#[derive(Debug)]
pub(crate) struct MultipartState<'r> {
    pub(crate) buffer: StreamBuffer<'r>,
    pub(crate) assembler: Option<PartAssembler>,
    pub(crate) pending_error: Option<crate::Error>,
    pub(crate) stage: StreamingStage,
    pub(crate) is_prev_part_consumed: bool,
    pub(crate) next_part_waker: Option<Waker>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamingStage {
    ReadingParts,
    Eof,
}

impl MultipartState<'_> {
    /// Yields the next event of the session, reading from the upstream only
    /// when no event is queued.
    ///
    /// Any error ends the session, so it is reported exactly once.
    pub(crate) fn poll_event(&mut self, cx: &mut Context<'_>) -> Poll<Option<crate::Result<Event>>> {
        if let Some(err) = self.pending_error.take() {
            self.stage = StreamingStage::Eof;
            return Poll::Ready(Some(Err(err)));
        }

        loop {
            if self.stage == StreamingStage::Eof {
                return Poll::Ready(None);
            }

            let assembler = match self.assembler.as_mut() {
                Some(assembler) => assembler,
                None => {
                    self.stage = StreamingStage::Eof;
                    return Poll::Ready(None);
                }
            };

            if let Some(event) = assembler.next_event() {
                if event == Event::Finish {
                    self.stage = StreamingStage::Eof;
                }
                return Poll::Ready(Some(Ok(event)));
            }

            let result = match self.buffer.poll_chunk(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(Ok(chunk))) => assembler.write(&chunk),
                Poll::Ready(Some(Err(err))) => Err(err),
                Poll::Ready(None) => match assembler.end() {
                    // The final delimiter was already reported.
                    Ok(()) => {
                        self.stage = StreamingStage::Eof;
                        return Poll::Ready(None);
                    }
                    Err(err) => Err(err),
                },
            };

            if let Err(err) = result {
                self.stage = StreamingStage::Eof;
                return Poll::Ready(Some(Err(err)));
            }
        }
    }
}
