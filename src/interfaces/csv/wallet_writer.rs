use crate::domain::wallet::Wallet;
use crate::error::Result;
use std::io::Write;

/// Writes wallets as `owner,symbol,class,balance` rows.
pub struct WalletWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> WalletWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_wallets(&mut self, wallets: impl IntoIterator<Item = Wallet>) -> Result<()> {
        self.writer
            .write_record(["owner", "symbol", "class", "balance"])?;
        for wallet in wallets {
            self.writer.write_record([
                wallet.owner().to_string(),
                wallet.symbol().to_string(),
                wallet.class().to_string(),
                wallet.balance.to_string(),
            ])?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::Balance;
    use crate::domain::wallet::WalletKey;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    #[test]
    fn test_write_wallets() {
        let mut wallet = Wallet::new(WalletKey::user("u1", "IND"), Utc::now());
        wallet.balance = Balance::new(dec!(12.500));

        let mut out = Vec::new();
        WalletWriter::new(&mut out).write_wallets([wallet]).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "owner,symbol,class,balance\nu1,IND,USER,12.5\n");
    }
}
