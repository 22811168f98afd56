//! Outbound printer transport.
//!
//! Thermal printers speak raw TCP on port 9100. Every call is bounded by
//! a timeout so a wedged printer cannot stall the worker.

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::common::{AppError, AppResult};

#[async_trait]
pub trait PrinterTransport: Send + Sync {
    async fn send(&self, address: &str, payload: &[u8]) -> AppResult<()>;
}

pub struct TcpPrinterTransport {
    timeout: Duration,
}

impl TcpPrinterTransport {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl PrinterTransport for TcpPrinterTransport {
    async fn send(&self, address: &str, payload: &[u8]) -> AppResult<()> {
        let io = async {
            let mut stream = TcpStream::connect(address).await?;
            stream.write_all(payload).await?;
            stream.flush().await?;
            stream.shutdown().await?;
            Ok::<(), std::io::Error>(())
        };

        match tokio::time::timeout(self.timeout, io).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(AppError::infra(format!("printer {address}: {e}"))),
            Err(_) => Err(AppError::infra(format!("printer {address}: send timed out"))),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;

    /// Transport that follows a script of outcomes, then succeeds.
    pub struct ScriptedTransport {
        script: Mutex<Vec<Result<(), String>>>,
        pub sent: Mutex<Vec<(String, Vec<u8>)>>,
    }

    impl ScriptedTransport {
        pub fn new(script: Vec<Result<(), String>>) -> Self {
            Self {
                script: Mutex::new(script),
                sent: Mutex::new(Vec::new()),
            }
        }

        /// An empty script means success, so a long failure script stands
        /// in for a printer that never answers.
        pub fn always_failing() -> Self {
            Self::new(vec![Err("unreachable".to_string()); 64])
        }
    }

    #[async_trait]
    impl PrinterTransport for ScriptedTransport {
        async fn send(&self, address: &str, payload: &[u8]) -> AppResult<()> {
            let next = {
                let mut script = self.script.lock();
                if script.is_empty() {
                    Ok(())
                } else {
                    script.remove(0)
                }
            };
            match next {
                Ok(()) => {
                    self.sent
                        .lock()
                        .push((address.to_string(), payload.to_vec()));
                    Ok(())
                }
                Err(e) => Err(AppError::infra(e)),
            }
        }
    }
}
