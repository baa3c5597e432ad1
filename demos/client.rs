//! Minimal blocking demo: SET then GET over a standalone connection, using
//! the library's codec instead of hand-written byte literals.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;

use slotwire::codec::resp::RespCodec;
use slotwire::codec::{Dialect, Progress, ProtocolOptions};
use slotwire::{ByteBuffer, Packet};

fn main() -> anyhow::Result<()> {
    let mut stream = TcpStream::connect(slotwire::DEFAULT_ADDR)?;
    let options = Arc::new(ProtocolOptions::default());
    let mut codec = RespCodec::new(Dialect::Resp2, options);

    let mut out = ByteBuffer::new();
    RespCodec::encode_request(&mut out, &["SET", "hello", "world"]);
    stream.write_all(out.data())?;
    println!("{:?}", read_reply(&mut stream, &mut codec)?);

    let mut out = ByteBuffer::new();
    RespCodec::encode_request(&mut out, &["GET", "hello"]);
    stream.write_all(out.data())?;
    println!("{:?}", read_reply(&mut stream, &mut codec)?);

    Ok(())
}

fn read_reply(stream: &mut TcpStream, codec: &mut RespCodec) -> anyhow::Result<Packet> {
    let mut inbound = ByteBuffer::new();
    let mut chunk = [0u8; 4096];
    loop {
        match codec.decode(&mut inbound) {
            Progress::Done(packet) => return Ok(packet),
            Progress::Failed(e) => anyhow::bail!(e),
            Progress::NeedMore => {
                let n = stream.read(&mut chunk)?;
                if n == 0 {
                    anyhow::bail!("connection closed mid-reply");
                }
                inbound.append(&chunk[..n]);
            }
        }
    }
}
