use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

static CANCEL: tokio::sync::OnceCell<CancellationToken> = tokio::sync::OnceCell::const_new();

/// Handle for noticing that the OS asked us to shut down.
pub struct Quit(CancellationToken);

impl Quit {
    /// Run a future until it finishes or the program is asked to quit,
    /// whichever comes first.
    pub async fn run_until_cancelled<F>(&self, fut: F) -> Option<F::Output>
    where
        F: Future,
    {
        self.0.run_until_cancelled(fut).await
    }
}

/// Cancel the token once the given signal stream fires.
fn cancel_on<S, Fut>(
    cancel: &CancellationToken,
    name: &'static str,
    signal: std::io::Result<S>,
    recv: fn(S) -> Fut,
) where
    S: Send + 'static,
    Fut: Future + Send + 'static,
{
    let signal = match signal {
        Ok(s) => s,
        Err(e) => {
            warn!("Couldn't listen for {name}: {e}");
            return;
        }
    };
    let cancel = cancel.clone();
    tokio::spawn(async move {
        recv(signal).await;
        debug!("Caught {name}, shutting down");
        cancel.cancel();
    });
}

pub async fn quit_watch() -> Quit {
    let cancel = CANCEL
        .get_or_init(|| async move {
            let cancel = CancellationToken::new();
            #[cfg(unix)]
            {
                use tokio::signal::unix::{Signal, SignalKind, signal};

                async fn recv(mut s: Signal) {
                    s.recv().await;
                }
                for (name, kind) in [
                    ("SIGINT", SignalKind::interrupt()),
                    ("SIGHUP", SignalKind::hangup()),
                    ("SIGTERM", SignalKind::terminate()),
                    ("SIGPIPE", SignalKind::pipe()),
                    ("SIGQUIT", SignalKind::quit()),
                ] {
                    cancel_on(&cancel, name, signal(kind), recv);
                }
            }
            #[cfg(windows)]
            {
                use tokio::signal::windows;

                cancel_on(&cancel, "ctrl-c", windows::ctrl_c(), |mut s| async move {
                    s.recv().await;
                });
                cancel_on(&cancel, "ctrl-break", windows::ctrl_break(), |mut s| async move {
                    s.recv().await;
                });
                cancel_on(&cancel, "ctrl-close", windows::ctrl_close(), |mut s| async move {
                    s.recv().await;
                });
            }
            cancel
        })
        .await;

    Quit(cancel.clone())
}
