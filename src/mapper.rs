//! Mapping of response nodes into accounts and transactions.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::document::{Document, Element};
use crate::error::{BankError, BankResult};

/// Response paths for account and transaction lists.
pub const ACCOUNTS_PATH: &str = "//cuentas/cuenta";
pub const TRANSACTIONS_PATH: &str = "//listadoMovimientos/movimiento";

/// Date format of `fechaValor`.
const DATE_FORMAT: &str = "%Y-%m-%d";

/// A currency-tagged amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Money {
    pub amount: Decimal,
    pub currency: String,
}

impl Money {
    pub fn new(amount: Decimal, currency: impl Into<String>) -> Self {
        Self {
            amount,
            currency: currency.into(),
        }
    }

    /// Parse the service's amount text.
    ///
    /// Periods are thousands separators and are dropped; a comma, if any,
    /// is the decimal separator. Empty or non-numeric text is an error.
    pub fn parse(text: &str, currency: &str, field: &'static str) -> BankResult<Self> {
        let normalized = text.trim().replace('.', "").replace(',', ".");
        let amount = Decimal::from_str(&normalized).map_err(|_| BankError::AmountParse {
            field,
            value: text.to_string(),
        })?;
        Ok(Self::new(amount, currency))
    }

    pub fn is_negative(&self) -> bool {
        self.amount.is_sign_negative() && !self.amount.is_zero()
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.currency)
    }
}

/// A bank account as listed by `obtenerPosGlobal_LIP`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Account {
    pub id: String,
    pub name: String,
    /// Alias when the user set one, else the contract name
    pub description: String,
    pub available_balance: Option<Money>,
    pub balance: Money,
    pub currency: String,
    /// IBAN with all whitespace removed
    pub iban: String,
    /// Serialized `contratoIDViejo` contents; required by transaction queries
    #[serde(skip)]
    pub contract_id: String,
}

/// A single account movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transaction {
    pub id: String,
    /// Id of the account this movement belongs to
    pub account_id: String,
    pub amount: Money,
    pub description: String,
    pub effective_date: NaiveDate,
    pub currency: String,
    /// Account balance after this movement
    pub balance: Money,
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}  {:<50}  {:>14}  {:>14}",
            self.effective_date.format("%d/%m/%Y"),
            self.description,
            self.amount.to_string(),
            self.balance.to_string()
        )
    }
}

/// Map one `cuenta` node.
pub fn map_account(node: &Element) -> BankResult<Account> {
    let name = node.value_at("comunes/descContrato", "");
    let description = match node.text_at("comunes/alias") {
        Some(alias) if !alias.is_empty() => alias,
        _ => name.clone(),
    };

    let currency = node.required_text_at("impSaldoActual/DIVISA")?;
    let balance = Money::parse(
        &node.required_text_at("impSaldoActual/IMPORTE")?,
        &currency,
        "impSaldoActual/IMPORTE",
    )?;
    let available_balance = node
        .text_at("importeDispAut/IMPORTE")
        .map(|text| {
            let available_currency = node.value_at("importeDispAut/DIVISA", &currency);
            Money::parse(&text, &available_currency, "importeDispAut/IMPORTE")
        })
        .transpose()?;

    let iban = node
        .value_at("IBAN", "")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();

    let contract_id = node
        .node_at("contratoIDViejo")
        .ok_or_else(|| BankError::malformed("account without contratoIDViejo"))?
        .inner_xml()?;

    Ok(Account {
        id: node.required_text_at("comunes/contratoID/NUMERO_DE_CONTRATO")?,
        name,
        description,
        available_balance,
        balance,
        currency,
        iban,
        contract_id,
    })
}

/// Map every account in an `obtenerPosGlobal_LIP` response, in response order.
pub fn map_accounts(document: &Document) -> BankResult<Vec<Account>> {
    document.select(ACCOUNTS_PATH).into_iter().map(map_account).collect()
}

/// Map one `movimiento` node belonging to `account`.
pub fn map_transaction(node: &Element, account: &Account) -> BankResult<Transaction> {
    let currency = node.required_text_at("importe/DIVISA")?;
    let amount = Money::parse(
        &node.required_text_at("importe/IMPORTE")?,
        &currency,
        "importe/IMPORTE",
    )?;
    let balance = Money::parse(
        &node.required_text_at("importeSaldo/IMPORTE")?,
        &node.required_text_at("importeSaldo/DIVISA")?,
        "importeSaldo/IMPORTE",
    )?;

    let date_text = node.required_text_at("fechaValor")?;
    let effective_date =
        NaiveDate::parse_from_str(&date_text, DATE_FORMAT).map_err(|_| BankError::DateParse {
            field: "fechaValor",
            value: date_text.clone(),
        })?;

    Ok(Transaction {
        id: node.required_text_at("numeroMovimiento")?,
        account_id: account.id.clone(),
        amount,
        description: node.value_at("descripcion", ""),
        effective_date,
        currency,
        balance,
    })
}

/// Map every movement on one transaction page, in response order.
pub fn map_transactions(document: &Document, account: &Account) -> BankResult<Vec<Transaction>> {
    document
        .select(TRANSACTIONS_PATH)
        .into_iter()
        .map(|node| map_transaction(node, account))
        .collect()
}

/// Find an account by IBAN, ignoring whitespace on both sides.
pub fn find_account_by_iban<'a>(accounts: &'a [Account], iban: &str) -> Option<&'a Account> {
    let wanted: String = iban.chars().filter(|c| !c.is_whitespace()).collect();
    accounts
        .iter()
        .find(|account| account.iban.eq_ignore_ascii_case(&wanted))
}
