//! Receiving role: accept connections and, for each, answer PDUs until the
//! peer completes the transfer, fails it or goes away.

use anyhow::Result;
use std::{path::{Path, PathBuf}, time::Duration};

use crate::{
    error::{error_code_for, TransferError},
    pdu::{ErrorCode, Message, Pdu, PduError},
    sequence::{SeqCheck, Sequencer},
    storage::{self, StagedFile},
    transport::{Channel, Listener},
};

#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub recv_dir: PathBuf,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// COMPLETE was acknowledged.
    Completed,
    /// The peer went away (or stopped answering) before COMPLETE.
    Closed,
    /// We answered with an ERROR PDU and ended the session.
    Failed(ErrorCode),
}

#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session: u64,
    pub peer: String,
    pub outcome: SessionOutcome,
    pub file: Option<PathBuf>,
    pub bytes_written: u64,
    pub sha256: Option<[u8; 32]>,
    pub pdus_received: u32,
    pub out_of_order: u32,
}

enum Step {
    Continue,
    End(SessionOutcome),
}

/// Session-local state; nothing here is shared between connections.
struct Session<'a> {
    id: u64,
    dir: &'a Path,
    seq: Sequencer,
    file: Option<StagedFile>,
    total_size: u64,
    report: SessionReport,
}

impl<'a> Session<'a> {
    /// Count a received PDU and check its sequence number, whether or not
    /// it is going to be handled.
    fn note_inbound(&mut self, seq: u32) {
        self.report.pdus_received += 1;
        if let SeqCheck::OutOfOrder { expected, got } = self.seq.check_inbound(seq) {
            log::warn!("session {}: out of order pdu: expected seq {}, got {}", self.id, expected, got);
            self.report.out_of_order += 1;
        }
    }

    async fn reply(&mut self, channel: &mut Channel, message: Message) -> Result<(), TransferError> {
        channel.send_pdu(&Pdu::new(self.seq.next_outbound(), message)).await
    }

    async fn close_file(&mut self) {
        if let Some(f) = self.file.take() {
            log::info!("session {}: discarding partial {:?} ({} bytes)", self.id, f.target(), f.bytes_written());
            f.discard().await;
        }
    }

    /// Report `code` to the peer and end the session.
    async fn fail(&mut self, channel: &mut Channel, code: ErrorCode) -> Result<Step, TransferError> {
        self.close_file().await;
        self.reply(channel, Message::Error(code)).await?;
        Ok(Step::End(SessionOutcome::Failed(code)))
    }

    async fn handle(&mut self, channel: &mut Channel, pdu: Pdu) -> Result<Step, TransferError> {
        match pdu.message {
            Message::Filename { name, total_size } => {
                if self.file.is_some() {
                    log::warn!("session {}: second FILENAME {:?} in one session", self.id, name);
                    return self.fail(channel, ErrorCode::Unknown).await;
                }
                if !storage::is_bare_name(&name) {
                    log::warn!("session {}: refusing file name {:?}", self.id, name);
                    return self.fail(channel, ErrorCode::Permission).await;
                }
                match StagedFile::create(self.dir, &name, self.id).await {
                    Ok(f) => {
                        log::info!("session {}: receiving {} ({} bytes declared)", self.id, name, total_size);
                        self.file = Some(f);
                        self.total_size = total_size;
                        self.reply(channel, Message::Ack).await?;
                        Ok(Step::Continue)
                    }
                    Err(e) => {
                        log::error!("session {}: cannot open {:?} in {:?}: {}", self.id, name, self.dir, e);
                        let code = match error_code_for(&e) {
                            ErrorCode::Unknown => ErrorCode::FileNotFound,
                            code => code,
                        };
                        self.fail(channel, code).await
                    }
                }
            }
            Message::Data(payload) => {
                let Some(f) = self.file.as_mut() else {
                    log::warn!("session {}: DATA before FILENAME", self.id);
                    return self.fail(channel, ErrorCode::Unknown).await;
                };
                if let Err(e) = f.append(&payload).await {
                    log::error!("session {}: write failed: {}", self.id, e);
                    return self.fail(channel, error_code_for(&e)).await;
                }
                self.report.bytes_written = f.bytes_written();
                log::debug!("session {}: wrote {} bytes", self.id, payload.len());
                self.reply(channel, Message::Ack).await?;
                Ok(Step::Continue)
            }
            Message::Complete => {
                match self.file.take() {
                    None => {}
                    Some(f) if f.bytes_written() != self.total_size => {
                        log::warn!(
                            "session {}: COMPLETE after {} bytes, {} declared",
                            self.id, f.bytes_written(), self.total_size
                        );
                        f.discard().await;
                        return self.fail(channel, ErrorCode::Unknown).await;
                    }
                    Some(f) => match f.finish().await {
                        Ok((path, digest)) => {
                            self.report.file = Some(path);
                            self.report.sha256 = Some(digest);
                        }
                        Err(e) => {
                            log::error!("session {}: could not store file: {}", self.id, e);
                            return self.fail(channel, error_code_for(&e)).await;
                        }
                    },
                }
                self.reply(channel, Message::Ack).await?;
                Ok(Step::End(SessionOutcome::Completed))
            }
            Message::Error(code) => {
                log::warn!("session {}: peer reported error: {}", self.id, code);
                self.close_file().await;
                Ok(Step::Continue)
            }
            Message::Ack => {
                log::debug!("session {}: ignoring stray ACK seq={}", self.id, pdu.seq);
                Ok(Step::Continue)
            }
        }
    }
}

/// Serve one connection until its session ends, then disconnect.
pub async fn run_session(channel: &mut Channel, recv_dir: &Path, id: u64) -> SessionReport {
    let mut s = Session {
        id,
        dir: recv_dir,
        seq: Sequencer::new(),
        file: None,
        total_size: 0,
        report: SessionReport {
            session: id,
            peer: channel.peer().to_string(),
            outcome: SessionOutcome::Closed,
            file: None,
            bytes_written: 0,
            sha256: None,
            pdus_received: 0,
            out_of_order: 0,
        },
    };

    let outcome = loop {
        let pdu = match channel.recv_pdu().await {
            Ok(Some(pdu)) => pdu,
            Ok(None) => {
                log::info!("session {}: client closed connection", id);
                break SessionOutcome::Closed;
            }
            Err(TransferError::Pdu(e @ PduError::UnknownMsgType { seq, .. })) => {
                s.note_inbound(seq);
                log::warn!("session {}: ignoring pdu: {}", id, e);
                continue;
            }
            Err(TransferError::Pdu(e)) => {
                log::warn!("session {}: rejecting pdu: {}", id, e);
                match s.fail(channel, ErrorCode::Unknown).await {
                    Ok(Step::End(outcome)) => break outcome,
                    Ok(Step::Continue) => continue,
                    Err(e) => {
                        log::warn!("session {}: {}", id, e);
                        break SessionOutcome::Closed;
                    }
                }
            }
            Err(e) => {
                log::warn!("session {}: receive failed: {}", id, e);
                break SessionOutcome::Closed;
            }
        };

        s.note_inbound(pdu.seq);
        match s.handle(channel, pdu).await {
            Ok(Step::Continue) => {}
            Ok(Step::End(outcome)) => break outcome,
            Err(e) => {
                log::warn!("session {}: reply failed: {}", id, e);
                break SessionOutcome::Closed;
            }
        }
    };

    s.close_file().await;
    channel.disconnect().await;
    s.report.outcome = outcome;
    s.report
}

fn log_report(r: &SessionReport) {
    match (r.outcome, &r.file) {
        (SessionOutcome::Completed, Some(path)) => log::info!(
            "session {} from {}: stored {} ({} bytes, sha256 {})",
            r.session,
            r.peer,
            path.display(),
            r.bytes_written,
            r.sha256.map(|d| storage::hex(&d)).unwrap_or_default()
        ),
        (outcome, _) => log::info!("session {} from {}: {:?}", r.session, r.peer, outcome),
    }
}

/// Accept connections forever, one task per session.
pub async fn serve(listener: Listener, opts: ServerOptions) -> Result<()> {
    log::info!("listening on {} (receive dir {})", listener.local_addr()?, opts.recv_dir.display());
    let mut next_id = 0u64;
    loop {
        let incoming = match listener.accept().await {
            Ok(Some(incoming)) => incoming,
            Ok(None) => break,
            Err(e) => {
                log::warn!("accept failed: {e:?}");
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }
        };
        next_id += 1;
        let id = next_id;
        let opts = opts.clone();
        tokio::spawn(async move {
            match incoming.open().await {
                Ok(channel) => {
                    let mut channel = channel.with_timeout(opts.timeout);
                    log::info!("session {}: connected {}", id, channel.peer());
                    let report = run_session(&mut channel, &opts.recv_dir, id).await;
                    log_report(&report);
                }
                Err(e) => log::warn!("session {}: connection setup failed: {e:?}", id),
            }
        });
    }
    Ok(())
}
