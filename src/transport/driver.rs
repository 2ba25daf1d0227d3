//! Async driver binding a byte stream to a layer chain.
//!
//! The chain itself never awaits. This task owns the stream and the topmost
//! [`Endpoint`], and runs every event (application message, socket read,
//! timer) to completion before the next one, so layers need no locking.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Duration, Instant};
use tracing::{debug, error, trace};

use crate::core::constants::READ_BUFFER_SIZE;
use crate::core::{respond, Endpoint, Error, Frame, Responder, Result};

/// Messages an application handle sends to the driver.
#[derive(Debug)]
pub enum Message<C> {
    /// Endpoint-specific request.
    Command(C),
    /// Graceful shutdown of the whole chain.
    Close(Responder<()>),
}

/// Drive `endpoint` over `stream` until the chain is closed or destroyed.
///
/// Frames the endpoint forwards without a waiting caller go to `unsolicited`.
pub async fn run<E, S>(
    mut endpoint: E,
    mut stream: S,
    mut messages: mpsc::UnboundedReceiver<Message<E::Command>>,
    unsolicited: mpsc::UnboundedSender<Frame>,
) where
    E: Endpoint,
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let mut close_waiters: Vec<Responder<()>> = Vec::new();
    let mut accepting = true;
    let mut closing = false;
    let mut outcome: Result<()> = Ok(());

    loop {
        if let Err(err) = flush(&mut endpoint, &mut stream).await {
            outcome = Err(destroy(&mut endpoint, err));
            break;
        }
        while let Some(frame) = endpoint.poll_forward() {
            trace!(len = frame.len(), "unsolicited frame");
            let _ = unsolicited.send(frame);
        }
        if closing && endpoint.is_closed() {
            debug!("pipeline closed");
            let _ = stream.shutdown().await;
            break;
        }

        let deadline = endpoint.poll_timeout();
        let wake_at = deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

        tokio::select! {
            message = messages.recv(), if accepting => match message {
                Some(Message::Command(command)) => endpoint.handle_command(command),
                Some(Message::Close(waiter)) => {
                    close_waiters.push(waiter);
                    if !closing {
                        closing = true;
                        endpoint.close();
                    }
                }
                None => {
                    accepting = false;
                    if !closing {
                        debug!("all handles dropped, closing pipeline");
                        closing = true;
                        endpoint.close();
                    }
                }
            },
            read = stream.read(&mut buf) => {
                let received = match read {
                    Ok(0) => Err(Error::ConnectionClosed),
                    Ok(n) => endpoint.receive(&buf[..n]),
                    Err(err) => Err(Error::from(err)),
                };
                if let Err(err) = received {
                    outcome = Err(destroy(&mut endpoint, err));
                    break;
                }
            },
            _ = sleep_until(wake_at), if deadline.is_some() => {
                if let Err(err) = endpoint.handle_timeout(Instant::now()) {
                    outcome = Err(destroy(&mut endpoint, err));
                    break;
                }
            },
        }
    }

    // A chain destroyed while closing reports why.
    for waiter in close_waiters {
        respond(waiter, outcome.clone());
    }
}

async fn flush<E, S>(endpoint: &mut E, stream: &mut S) -> Result<()>
where
    E: Endpoint,
    S: AsyncWrite + Unpin,
{
    let mut wrote = false;
    while let Some(bytes) = endpoint.transport_mut().poll_transmit() {
        stream.write_all(&bytes).await?;
        wrote = true;
    }
    if wrote {
        stream.flush().await?;
    }
    Ok(())
}

fn destroy<E: Endpoint>(endpoint: &mut E, err: Error) -> Error {
    if err.is_fatal() {
        error!(error = %err, "destroying pipeline");
    } else {
        debug!(error = %err, "destroying pipeline");
    }
    endpoint.destroy(err.clone());
    err
}
