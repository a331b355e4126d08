use super::packet::{encode_command, NrpeError, Packet, PacketType};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;

pub async fn query(
    addr: SocketAddr,
    command: &str,
    args: &[String],
    timeout: Duration,
) -> Result<Packet, NrpeError> {
    let exchange = async {
        let mut stream = TcpStream::connect(addr).await?;
        Packet::query(&encode_command(command, args))
            .write_to(&mut stream)
            .await?;
        let response = Packet::read_from(&mut stream).await?;
        response.verify(PacketType::Response)?;
        Ok(response)
    };
    tokio::time::timeout(timeout, exchange)
        .await
        .map_err(|_| NrpeError::Timeout(timeout))?
}
