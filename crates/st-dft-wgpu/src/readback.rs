// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::time::{Duration, Instant};

use tracing::{debug, warn};
use wgpu::{BufferAsyncError, Maintain, MapMode};

use crate::context::WgpuContext;
use crate::error::ReadbackError;
use crate::resources::{create_tracked, BufferKind, GpuBuffer, ResourceLedger};
use crate::util::with_validation_scope;

/// Copy the first `byte_len` bytes of `source` to the host.
///
/// The copy goes through a staging buffer whose map is awaited by polling the
/// device until the callback reports or `timeout` elapses. The staging buffer
/// is released on every path.
pub fn read_buffer(
    ctx: &WgpuContext,
    ledger: &ResourceLedger,
    source: &GpuBuffer,
    byte_len: u64,
    timeout: Duration,
) -> Result<Vec<f32>, ReadbackError> {
    check_range(byte_len, source.size())?;
    if byte_len == 0 {
        return Ok(Vec::new());
    }

    let device = ctx.device();
    let (staging, error) = with_validation_scope(device, || {
        let staging =
            create_tracked(ctx, ledger, "st.dft.readback", byte_len, BufferKind::Staging);
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("st.dft.readback"),
        });
        encoder.copy_buffer_to_buffer(source.buffer(), 0, &staging, 0, byte_len);
        ctx.queue().submit(Some(encoder.finish()));
        staging
    });
    if let Some(err) = error {
        return Err(ReadbackError::Copy(err.to_string()));
    }

    let slice = staging.slice(..byte_len);
    let (sender, receiver) = mpsc::channel();
    slice.map_async(MapMode::Read, move |result| {
        let _ = sender.send(result);
    });

    let started = Instant::now();
    let poll = || {
        device.poll(Maintain::Poll);
    };
    if let Err(err) = wait_for_map(poll, &receiver, timeout) {
        if let ReadbackError::Timeout(_) = err {
            warn!(source = source.label(), bytes = byte_len, ?timeout, "readback timed out");
        }
        return Err(err);
    }

    let data = slice.get_mapped_range();
    let values = bytemuck::cast_slice::<u8, f32>(&data).to_vec();
    drop(data);
    staging.unmap();
    debug!(
        source = source.label(),
        bytes = byte_len,
        elapsed = ?started.elapsed(),
        "readback complete"
    );
    Ok(values)
}

/// Drive `poll` until the map callback reports through `receiver`, or fail
/// once `timeout` has elapsed. `poll` runs at least once.
fn wait_for_map(
    mut poll: impl FnMut(),
    receiver: &Receiver<Result<(), BufferAsyncError>>,
    timeout: Duration,
) -> Result<(), ReadbackError> {
    // A timeout too large to represent never expires.
    let deadline = Instant::now().checked_add(timeout);
    loop {
        poll();
        match receiver.try_recv() {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(err)) => return Err(ReadbackError::Map(err)),
            Err(TryRecvError::Disconnected) => return Err(ReadbackError::CallbackDropped),
            Err(TryRecvError::Empty) => {}
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(ReadbackError::Timeout(timeout));
        }
        std::thread::yield_now();
    }
}

fn check_range(byte_len: u64, available: u64) -> Result<(), ReadbackError> {
    if byte_len > available {
        return Err(ReadbackError::OutOfRange {
            requested: byte_len,
            available,
        });
    }
    if byte_len % std::mem::size_of::<f32>() as u64 != 0 {
        return Err(ReadbackError::Misaligned(byte_len));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{ObjectKind, Tracked};

    fn channel() -> (
        mpsc::Sender<Result<(), BufferAsyncError>>,
        Receiver<Result<(), BufferAsyncError>>,
    ) {
        mpsc::channel()
    }

    #[test]
    fn wait_returns_once_the_callback_reports() {
        let (sender, receiver) = channel();
        let mut sender = Some(sender);
        let mut polls = 0;
        let result = wait_for_map(
            || {
                polls += 1;
                if polls == 3 {
                    if let Some(sender) = sender.take() {
                        sender.send(Ok(())).unwrap();
                    }
                }
            },
            &receiver,
            Duration::from_secs(5),
        );
        assert!(result.is_ok());
        assert_eq!(polls, 3);
    }

    #[test]
    fn wait_times_out_when_the_callback_never_fires() {
        let (_sender, receiver) = channel();
        let mut polls = 0;
        let timeout = Duration::from_millis(20);
        let err = wait_for_map(|| polls += 1, &receiver, timeout).unwrap_err();
        assert!(matches!(err, ReadbackError::Timeout(t) if t == timeout));
        assert!(polls >= 1);
    }

    #[test]
    fn zero_timeout_still_polls_once() {
        let (sender, receiver) = channel();
        sender.send(Ok(())).unwrap();
        assert!(wait_for_map(|| {}, &receiver, Duration::ZERO).is_ok());
    }

    #[test]
    fn dropped_callback_and_map_failure_are_reported() {
        let (sender, receiver) = channel();
        drop(sender);
        let timeout = Duration::from_secs(5);
        assert!(matches!(
            wait_for_map(|| {}, &receiver, timeout),
            Err(ReadbackError::CallbackDropped)
        ));

        let (sender, receiver) = channel();
        sender.send(Err(BufferAsyncError)).unwrap();
        assert!(matches!(
            wait_for_map(|| {}, &receiver, timeout),
            Err(ReadbackError::Map(_))
        ));
    }

    #[test]
    fn staging_is_released_when_the_wait_fails() {
        let ledger = ResourceLedger::new();
        let (_sender, receiver) = channel();
        let attempt = || -> Result<(), ReadbackError> {
            let _staging = Tracked::new(&ledger, ObjectKind::Buffer, "st.dft.readback", ());
            wait_for_map(|| {}, &receiver, Duration::ZERO)?;
            Ok(())
        };
        assert!(matches!(attempt(), Err(ReadbackError::Timeout(_))));
        let snapshot = ledger.snapshot();
        assert_eq!(snapshot.allocated_of(ObjectKind::Buffer), 1);
        assert_eq!(snapshot.released_of(ObjectKind::Buffer), 1);
        assert_eq!(snapshot.live(), 0);
    }

    #[test]
    fn range_must_fit_the_source() {
        assert!(check_range(64, 64).is_ok());
        assert!(check_range(0, 64).is_ok());
        assert!(matches!(
            check_range(72, 64),
            Err(ReadbackError::OutOfRange {
                requested: 72,
                available: 64
            })
        ));
        assert!(matches!(check_range(6, 64), Err(ReadbackError::Misaligned(6))));
    }
}
