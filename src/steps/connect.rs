//! Waits for the build server's SSH port and installs the guest channel.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info};

use super::{BuildContext, CleanupFuture, Step, StepError, StepFuture};
use crate::guest::{CommandRunner, SshCommunicator, SshSettings};

const CONNECT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);

/// Probes the SSH port of `server_ip` until it accepts connections, then
/// installs an [`SshCommunicator`] for later steps.
pub struct ConnectStep<R> {
    runner: R,
    settings: SshSettings,
    wait_timeout: Duration,
    poll_interval: Duration,
}

impl<R> ConnectStep<R>
where
    R: CommandRunner + Clone + 'static,
{
    /// Creates the step with the given probe budget.
    #[must_use]
    pub const fn new(
        runner: R,
        settings: SshSettings,
        wait_timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            runner,
            settings,
            wait_timeout,
            poll_interval,
        }
    }

    async fn connect(&self, context: &mut BuildContext) -> Result<(), StepError> {
        let ip = context
            .state
            .server_ip
            .ok_or(StepError::MissingState { key: "server_ip" })?;
        let address = SocketAddr::new(ip, self.settings.port);
        context.ui.say(&format!("Waiting for SSH on {address}..."));

        // An unrepresentable deadline means the timeout never elapses.
        let deadline = Instant::now().checked_add(self.wait_timeout);
        loop {
            let last_error =
                match timeout(CONNECT_ATTEMPT_TIMEOUT, TcpStream::connect(address)).await {
                    Ok(Ok(_)) => break,
                    Ok(Err(err)) => err.to_string(),
                    Err(_) => String::from("connection attempt timed out"),
                };
            debug!(%address, error = %last_error, "ssh not ready");
            let next_attempt = Instant::now().checked_add(self.poll_interval);
            if deadline.is_some_and(|limit| next_attempt.is_none_or(|next| next > limit)) {
                return Err(StepError::Connect {
                    address: address.to_string(),
                    message: last_error,
                });
            }
            tokio::select! {
                biased;
                () = context.cancel.cancelled() => {
                    return Err(StepError::Connect {
                        address: address.to_string(),
                        message: String::from("cancelled"),
                    });
                }
                () = sleep(self.poll_interval) => {}
            }
        }

        info!(%address, "ssh reachable");
        context.communicator = Some(Box::new(SshCommunicator::new(
            self.runner.clone(),
            self.settings.clone(),
            ip,
        )));
        Ok(())
    }
}

impl<R> Step for ConnectStep<R>
where
    R: CommandRunner + Clone + 'static,
{
    fn name(&self) -> &'static str {
        "connect"
    }

    fn run<'a>(&'a self, context: &'a mut BuildContext) -> StepFuture<'a> {
        Box::pin(async move {
            let result = self.connect(context).await;
            context.conclude(result)
        })
    }

    fn cleanup<'a>(&'a self, context: &'a mut BuildContext) -> CleanupFuture<'a> {
        Box::pin(async move {
            context.communicator = None;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::StepAction;
    use crate::test_support::{RecordingUi, ScriptedRunner};
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Arc;
    use tokio::net::TcpListener;
    use tokio_util::sync::CancellationToken;

    fn context() -> (BuildContext, RecordingUi) {
        let ui = RecordingUi::new();
        let context = BuildContext::new(Arc::new(ui.clone()), CancellationToken::new());
        (context, ui)
    }

    fn step(port: u16, wait_timeout: Duration) -> ConnectStep<ScriptedRunner> {
        let settings = SshSettings {
            port,
            ..SshSettings::default()
        };
        ConnectStep::new(
            ScriptedRunner::new(),
            settings,
            wait_timeout,
            Duration::from_millis(5),
        )
    }

    #[tokio::test]
    async fn run_installs_communicator_once_port_accepts() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind listener");
        let port = listener.local_addr().expect("local addr").port();
        let (mut context, _ui) = context();
        context.state.server_ip = Some(IpAddr::V4(Ipv4Addr::LOCALHOST));

        let connect = step(port, Duration::from_secs(5));
        let action = connect.run(&mut context).await;

        assert_eq!(action, StepAction::Continue);
        assert!(context.communicator.is_some());

        connect.cleanup(&mut context).await;
        assert!(context.communicator.is_none());
    }

    #[tokio::test]
    async fn run_accepts_timeout_beyond_clock_range() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind listener");
        let port = listener.local_addr().expect("local addr").port();
        let (mut context, ui) = context();
        context.state.server_ip = Some(IpAddr::V4(Ipv4Addr::LOCALHOST));

        let action = step(port, Duration::from_secs(u64::MAX))
            .run(&mut context)
            .await;

        assert_eq!(action, StepAction::Continue);
        assert!(ui.errors().is_empty(), "{:?}", ui.errors());
        assert!(context.communicator.is_some());
    }

    #[tokio::test]
    async fn run_halts_without_server_ip() {
        let (mut context, ui) = context();

        let action = step(22, Duration::from_millis(10)).run(&mut context).await;

        assert_eq!(action, StepAction::Halt);
        assert_eq!(ui.errors(), vec![String::from("server_ip not found in pipeline state")]);
    }

    #[tokio::test]
    async fn run_halts_when_port_never_opens() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind listener");
        let port = listener.local_addr().expect("local addr").port();
        drop(listener);
        let (mut context, ui) = context();
        context.state.server_ip = Some(IpAddr::V4(Ipv4Addr::LOCALHOST));

        let action = step(port, Duration::from_millis(20)).run(&mut context).await;

        assert_eq!(action, StepAction::Halt);
        assert!(context.communicator.is_none());
        let errors = ui.errors();
        assert_eq!(errors.len(), 1);
        assert!(
            errors.iter().all(|message| message.contains("waiting for SSH")),
            "{errors:?}"
        );
    }
}
