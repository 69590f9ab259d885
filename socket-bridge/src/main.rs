//! Entry point for `socket-bridge`.
//!
//! Runs a small demo against the in-process loopback transport: a TCP echo
//! exchange or a UDP datagram exchange.  All socket work is delegated to the
//! library; `main.rs` owns only process setup (logging, argument parsing).

use std::cell::RefCell;
use std::rc::Rc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use socket_bridge::config::DEFAULT_MAX_SEND_CREDIT;
use socket_bridge::loopback::{self, Loopback, LoopbackConfig};
use socket_bridge::{Driver, Endpoint, Handle, Network, Protocol, Security, SocketConfig, SocketError, SocketState, TransportError};

/// Socket layer demo over an in-process transport.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Send credit per socket, in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_SEND_CREDIT)]
    max_send_credit: usize,

    /// Payload to send each round.
    #[arg(short, long, default_value = "hello")]
    message: String,

    /// Number of round trips.
    #[arg(short, long, default_value_t = 3)]
    rounds: usize,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// TCP: a client sends, a listener echoes back.
    Echo {
        /// Port the listener binds.
        #[arg(short, long, default_value_t = 9000)]
        port: u16,
    },
    /// UDP: datagrams to a bound receiver, which reports their source.
    Datagram {
        /// Port the receiver binds.
        #[arg(short, long, default_value_t = 9001)]
        port: u16,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();
    let config = SocketConfig::default().with_max_send_credit(cli.max_send_credit);
    let (mut driver, transport) = loopback::spawn(config, Loopback::new(LoopbackConfig::default()));

    match cli.mode {
        Mode::Echo { port } => echo(&mut driver, port, cli.message.as_bytes(), cli.rounds).await?,
        Mode::Datagram { port } => datagram(&mut driver, port, cli.message.as_bytes(), cli.rounds).await?,
    }

    drop(driver);
    transport.await.context("loopback task failed")?;
    Ok(())
}

/// Bind `handle` and wait for the transport to confirm.
async fn bind(driver: &mut Driver, handle: Handle, port: u16) -> anyhow::Result<Endpoint> {
    let outcome: Rc<RefCell<Option<Result<Endpoint, TransportError>>>> = Rc::default();
    let slot = Rc::clone(&outcome);
    driver
        .network_mut()
        .bind(handle, port, move |_, _, result| *slot.borrow_mut() = Some(result))?;
    if !driver.run_until(|_| outcome.borrow().is_some()).await? {
        bail!("transport stopped before bind completed");
    }
    let result = outcome.borrow_mut().take().context("bind outcome missing")?;
    Ok(result?)
}

/// Echo everything arriving on `handle`.  Bytes the send credit cannot
/// take yet wait in a backlog flushed from the writable callback.
fn watch_echo(net: &mut Network, handle: Handle) -> Result<(), SocketError> {
    let backlog: Rc<RefCell<Vec<u8>>> = Rc::default();
    let pending = Rc::clone(&backlog);
    net.set_on_readable(handle, move |net, h| echo_back(net, h, &pending))?;
    net.set_on_writable(handle, move |net, h| flush(net, h, &backlog))
}

fn echo_back(net: &mut Network, handle: Handle, backlog: &RefCell<Vec<u8>>) {
    let mut buf = Vec::new();
    match net.recv(handle, &mut buf, None) {
        Ok(0) => {
            log::info!("[demo] {handle} peer finished");
            let unsent = backlog.borrow().len();
            if unsent > 0 {
                log::warn!("[demo] {handle} closing with {unsent} bytes unechoed");
            }
            if let Err(e) = net.close(handle) {
                log::warn!("[demo] {handle} close failed: {e}");
            }
        }
        Ok(_) => {
            backlog.borrow_mut().extend(buf);
            flush(net, handle, backlog);
        }
        Err(SocketError::WouldBlock) => {}
        Err(e) => log::warn!("[demo] {handle} recv failed: {e}"),
    }
}

fn flush(net: &mut Network, handle: Handle, backlog: &RefCell<Vec<u8>>) {
    let mut pending = backlog.borrow_mut();
    if pending.is_empty() {
        return;
    }
    match net.send(handle, &mut pending, None, None) {
        Ok(sent) if !pending.is_empty() => {
            log::debug!("[demo] {handle} echoed {sent}; {} bytes wait for credit", pending.len());
        }
        Ok(_) => {}
        Err(e) => log::warn!("[demo] {handle} send failed: {e}"),
    }
}

async fn echo(driver: &mut Driver, port: u16, message: &[u8], rounds: usize) -> anyhow::Result<()> {
    let server = driver.network_mut().create(Protocol::Tcp, Security::None)?;
    let local = bind(driver, server, port).await?;

    let net = driver.network_mut();
    net.listen(server)?;
    net.set_on_readable(server, |net, listener| {
        while let Ok(Some(child)) = net.accept(listener) {
            if let Err(e) = watch_echo(net, child) {
                log::warn!("[demo] cannot watch {child}: {e}");
            }
        }
    })?;
    println!("listening on {local}");

    let client = net.create(Protocol::Tcp, Security::None)?;
    let failure: Rc<RefCell<Option<TransportError>>> = Rc::default();
    let slot = Rc::clone(&failure);
    net.set_on_error(client, move |_, _, e| *slot.borrow_mut() = Some(e.clone()))?;
    net.connect(client, local)?;

    driver
        .run_until(|net| net.state(client) == SocketState::Ready || failure.borrow().is_some())
        .await?;
    if let Some(e) = failure.borrow_mut().take() {
        bail!("connect failed: {e}");
    }

    for round in 1..=rounds {
        let mut out = message.to_vec();
        let sent = driver.network_mut().send(client, &mut out, None, None)?;
        if sent < message.len() {
            bail!("send credit exhausted after {sent} bytes");
        }
        let arrived = driver
            .run_until(|net| net.readable_len(client).is_ok_and(|n| n >= message.len()))
            .await?;
        if !arrived {
            bail!("transport stopped during round {round}");
        }
        let mut reply = Vec::new();
        driver.network_mut().recv(client, &mut reply, None)?;
        println!("round {round}: {}", String::from_utf8_lossy(&reply));
    }

    let net = driver.network_mut();
    net.shutdown(client)?;
    net.close(client)?;
    net.close(server)?;
    driver.pump()?;
    Ok(())
}

async fn datagram(driver: &mut Driver, port: u16, message: &[u8], rounds: usize) -> anyhow::Result<()> {
    let receiver = driver.network_mut().create(Protocol::Udp, Security::None)?;
    let target = bind(driver, receiver, port).await?;
    let sender = driver.network_mut().create(Protocol::Udp, Security::None)?;

    for round in 1..=rounds {
        let mut out = message.to_vec();
        driver.network_mut().send(sender, &mut out, None, Some(&target))?;
        if !driver.run_until(|net| net.readable_len(receiver).is_ok_and(|n| n > 0)).await? {
            bail!("transport stopped during round {round}");
        }
        let mut payload = Vec::new();
        let (_, source) = driver.network_mut().recv_from(receiver, &mut payload, None)?;
        let source = source.map_or_else(|| "?".to_string(), |s| s.to_string());
        println!("round {round}: {source} sent {}", String::from_utf8_lossy(&payload));
    }

    let net = driver.network_mut();
    net.close(sender)?;
    net.close(receiver)?;
    driver.pump()?;
    Ok(())
}
