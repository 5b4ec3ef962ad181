use crate::application::wallet::FeeType;
use crate::error::{Result, SaleError};
use crate::interfaces::service::Command;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Buy,
    Deposit,
    Subscribe,
    ChargeFee,
    ReferralReward,
    MarketingReward,
    AddCoupon,
}

/// One CSV row. Columns not used by an operation may be left empty or
/// omitted at the end of the row.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CommandRecord {
    pub op: Operation,
    pub user: String,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub source_id: String,
    /// Coupon code for `buy` and `add_coupon`.
    #[serde(default)]
    pub code: String,
    /// Fee type for `charge_fee`, sub-type for `deposit`.
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub reward: Option<Decimal>,
    #[serde(default)]
    pub cashback: Option<Decimal>,
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

impl TryFrom<CommandRecord> for Command {
    type Error = SaleError;

    fn try_from(record: CommandRecord) -> Result<Self> {
        let amount = || {
            record.amount.ok_or_else(|| {
                SaleError::ValidationError(format!("{:?} needs an amount", record.op))
            })
        };
        let command = match record.op {
            Operation::Buy => Command::BuyTokens {
                amount: amount()?,
                coupon: non_empty(record.code),
                user: record.user,
                symbol: record.symbol,
                source_id: record.source_id,
            },
            Operation::Deposit => Command::Deposit {
                amount: amount()?,
                sub_type: non_empty(record.kind),
                user: record.user,
                symbol: record.symbol,
                source_id: record.source_id,
            },
            Operation::Subscribe => Command::Subscribe {
                amount: amount()?,
                user: record.user,
                symbol: record.symbol,
                source_id: record.source_id,
            },
            Operation::ChargeFee => Command::ChargeFee {
                amount: amount()?,
                fee_type: FeeType::parse(&record.kind),
                user: record.user,
                symbol: record.symbol,
                source_id: record.source_id,
            },
            Operation::ReferralReward => Command::ReferralReward {
                amount: amount()?,
                user: record.user,
                symbol: record.symbol,
                source_id: record.source_id,
            },
            Operation::MarketingReward => Command::MarketingReward {
                amount: amount()?,
                user: record.user,
                symbol: record.symbol,
                source_id: record.source_id,
            },
            Operation::AddCoupon => Command::AddCoupon {
                reward: record.reward.unwrap_or_default(),
                cashback: record.cashback.unwrap_or_default(),
                owner: record.user,
                code: record.code,
            },
        };
        Ok(command)
    }
}

/// Reads commands from a CSV source with a header row.
pub struct CommandReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> CommandReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily reads and converts each row.
    pub fn commands(self) -> impl Iterator<Item = Result<Command>> {
        self.reader
            .into_deserialize::<CommandRecord>()
            .map(|result| result.map_err(SaleError::from).and_then(Command::try_from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_reader_valid_stream() {
        let data = "op, user, amount, symbol, source_id, code, kind, reward, cashback\n\
                    add_coupon, owner, , , , spring, , 0.08, 0.02\n\
                    buy, u1, 1000, USD, order-1, spring\n\
                    charge_fee, u1, 100, USDT, fee-1, , stablecoin\n";
        let commands: Vec<Result<Command>> =
            CommandReader::new(data.as_bytes()).commands().collect();
        assert_eq!(commands.len(), 3);

        assert_eq!(
            commands[0].as_ref().unwrap(),
            &Command::AddCoupon {
                owner: "owner".to_string(),
                code: "spring".to_string(),
                reward: dec!(0.08),
                cashback: dec!(0.02),
            }
        );
        assert_eq!(
            commands[1].as_ref().unwrap(),
            &Command::BuyTokens {
                user: "u1".to_string(),
                amount: dec!(1000),
                symbol: "USD".to_string(),
                source_id: "order-1".to_string(),
                coupon: Some("spring".to_string()),
            }
        );
        assert!(matches!(
            commands[2].as_ref().unwrap(),
            Command::ChargeFee {
                fee_type: FeeType::Stablecoin,
                ..
            }
        ));
    }

    #[test]
    fn test_reader_rejects_bad_rows() {
        let data = "op, user, amount\nrefund, u1, 1\nbuy, u1, \n";
        let commands: Vec<Result<Command>> =
            CommandReader::new(data.as_bytes()).commands().collect();
        assert!(commands[0].is_err());
        assert!(matches!(commands[1], Err(SaleError::ValidationError(_))));
    }
}
