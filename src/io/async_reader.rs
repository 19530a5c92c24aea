//! Asynchronous CSV reader with batch interface
//!
//! Reads replay commands from any `futures::io::AsyncRead` in batches, for the
//! async replay strategy.
//!
//! # Architecture
//!
//! ```text
//! CSV Reader → AsyncReader → Batches of Commands
//!                  ↓
//!           csv_format module
//!           (CommandRow, convert_command_row)
//! ```
//!
//! Rows that fail to parse or convert are logged and skipped; the reader
//! counts them so the caller can report them.

use crate::io::csv_format::{convert_command_row, CommandRow};
use crate::types::Command;
use csv_async::AsyncReaderBuilder;
use futures::io::AsyncRead;
use futures::stream::StreamExt;

/// Batching reader over a commands CSV stream
pub struct AsyncReader<R: AsyncRead + Unpin> {
    csv_reader: csv_async::AsyncDeserializer<R>,
    skipped: u64,
}

impl<R: AsyncRead + Unpin + Send + 'static> AsyncReader<R> {
    pub fn new(reader: R) -> Self {
        let csv_reader = AsyncReaderBuilder::new()
            .flexible(true)
            .trim(csv_async::Trim::All)
            .create_deserializer(reader);
        Self {
            csv_reader,
            skipped: 0,
        }
    }

    /// Read up to `batch_size` valid commands
    ///
    /// An empty batch means the stream is exhausted.
    pub async fn read_batch(&mut self, batch_size: usize) -> Vec<Command> {
        let mut batch = Vec::with_capacity(batch_size);
        let mut skipped = 0;
        let mut rows = self.csv_reader.deserialize::<CommandRow>();

        while batch.len() < batch_size {
            match rows.next().await {
                Some(Ok(row)) => match convert_command_row(row) {
                    Ok(command) => batch.push(command),
                    Err(error) => {
                        skipped += 1;
                        tracing::warn!(%error, "skipping command row");
                    }
                },
                Some(Err(error)) => {
                    skipped += 1;
                    tracing::warn!(%error, "skipping malformed command row");
                }
                None => break,
            }
        }

        self.skipped += skipped;
        batch
    }

    /// Rows skipped so far
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::io::Cursor;
    use rust_decimal::Decimal;

    const HEADER: &str = "type,account,order,amount,card,cvv,source,key\n";

    fn reader(rows: &str) -> AsyncReader<Cursor<Vec<u8>>> {
        AsyncReader::new(Cursor::new(format!("{}{}", HEADER, rows).into_bytes()))
    }

    #[tokio::test]
    async fn test_async_reader_multiple_batches() {
        let mut async_reader = reader(
            "payment,1,ORD-1,1.00000,4111111111111111,123,,\n\
             payment,1,ORD-2,2.00000,4111111111111111,123,,\n\
             refund,1,ORD-1,1.00000,,,,\n",
        );

        let first = async_reader.read_batch(2).await;
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].order_id(), "ORD-1");
        assert_eq!(first[1].order_id(), "ORD-2");

        let second = async_reader.read_batch(2).await;
        assert_eq!(second.len(), 1);
        assert!(matches!(&second[0], Command::Refund(r) if r.amount == Decimal::new(100_000, 5)));

        assert!(async_reader.read_batch(2).await.is_empty());
    }

    #[tokio::test]
    async fn test_async_reader_empty_csv() {
        let mut async_reader = reader("");
        assert!(async_reader.read_batch(10).await.is_empty());
        assert_eq!(async_reader.skipped(), 0);
    }

    #[tokio::test]
    async fn test_async_reader_skips_invalid_rows() {
        let mut async_reader = reader(
            "transfer,1,ORD-1,1.00000,,,,\n\
             payment,notanumber,ORD-2,1.00000,4111111111111111,123,,\n\
             refund,1,ORD-3,1.00000,,,,\n",
        );

        let batch = async_reader.read_batch(10).await;

        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].order_id(), "ORD-3");
        assert_eq!(async_reader.skipped(), 2);
    }

    #[tokio::test]
    async fn test_async_reader_whitespace_handling() {
        let mut async_reader = reader("  PAYMENT , 3 , ORD-1 , 5.00000 , 4111 1111 1111 1111 , 123 \n");

        let batch = async_reader.read_batch(10).await;

        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].account_id(), Some(3));
    }
}
