//! Tokio I/O exposed through `embedded-io-async`, so stdin/stdout can stand
//! in for the USB or UART endpoint.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub struct TokioIo<T>(pub T);

impl<T> embedded_io::ErrorType for TokioIo<T> {
    type Error = std::io::Error;
}

impl<T: AsyncRead + Unpin> embedded_io_async::Read for TokioIo<T> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.0.read(buf).await
    }
}

impl<T: AsyncWrite + Unpin> embedded_io_async::Write for TokioIo<T> {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        let n = self.0.write(buf).await?;
        // Serial consumers expect bytes as soon as they arrive
        self.0.flush().await?;
        Ok(n)
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        self.0.flush().await
    }
}
