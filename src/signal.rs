use tokio::signal::unix::{SignalKind, signal};

/// Control messages from the operating system.
#[derive(Debug, PartialEq)]
pub enum SignalTo {
    /// Stop gracefully
    Shutdown,
    /// Stop immediately
    Quit,
}

/// Waits for the next signal which should stop the process.
pub async fn os_signal() -> std::io::Result<SignalTo> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    let signal = tokio::select! {
        _ = sigint.recv() => {
            info!(message = "Signal received", signal = "SIGINT");
            SignalTo::Shutdown
        }
        _ = sigterm.recv() => {
            info!(message = "Signal received", signal = "SIGTERM");
            SignalTo::Shutdown
        }
        _ = sigquit.recv() => {
            info!(message = "Signal received", signal = "SIGQUIT");
            SignalTo::Quit
        }
    };

    Ok(signal)
}
