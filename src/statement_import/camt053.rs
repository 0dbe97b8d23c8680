//! CAMT.053 (ISO 20022 bank-to-customer statement) parser.

use quick_xml::events::Event;
use quick_xml::Reader;
use rust_decimal::Decimal;
use std::str::FromStr;

use super::{clean_text, decode_text, parse_date, ParseOutcome, RawTransaction, StatementFormat, StatementParser};
use crate::error::{LedgerError, Result};

pub struct Camt053Parser;

impl StatementParser for Camt053Parser {
    fn format(&self) -> StatementFormat {
        StatementFormat::Camt053
    }

    fn parse(&self, bytes: &[u8]) -> Result<ParseOutcome> {
        parse_xml(&decode_text(bytes))
    }
}

/// Fields collected between `<Ntry>` and `</Ntry>`
#[derive(Debug, Default)]
struct EntryBuilder {
    amount: Option<String>,
    direction: Option<String>,
    status: Option<String>,
    booking_date: Option<String>,
    value_date: Option<String>,
    account_servicer_ref: Option<String>,
    end_to_end: Option<String>,
    additional_info: Option<String>,
    remittance: Vec<String>,
    creditor_name: Option<String>,
    creditor_iban: Option<String>,
    debtor_name: Option<String>,
    debtor_iban: Option<String>,
}

fn ends_with(path: &[String], suffix: &[&str]) -> bool {
    path.len() >= suffix.len()
        && path[path.len() - suffix.len()..]
            .iter()
            .zip(suffix)
            .all(|(a, b)| a == b)
}

impl EntryBuilder {
    /// `path` is relative to the `Ntry` element
    fn assign(&mut self, path: &[String], value: &str) {
        if value.is_empty() {
            return;
        }
        let owned = || Some(value.to_string());

        match path {
            [leaf] if leaf == "Amt" => self.amount = owned(),
            [leaf] if leaf == "CdtDbtInd" => self.direction = owned(),
            [leaf] if leaf == "Sts" => self.status = owned(),
            [leaf] if leaf == "AcctSvcrRef" => self.account_servicer_ref = owned(),
            [leaf] if leaf == "AddtlNtryInf" => self.additional_info = owned(),
            [parent, leaf] if parent == "Sts" && leaf == "Cd" => self.status = owned(),
            [parent, leaf] if parent == "BookgDt" && (leaf == "Dt" || leaf == "DtTm") => {
                self.booking_date = owned()
            }
            [parent, leaf] if parent == "ValDt" && (leaf == "Dt" || leaf == "DtTm") => {
                self.value_date = owned()
            }
            _ => self.assign_details(path, value),
        }
    }

    /// Transaction details nested under `NtryDtls/TxDtls`
    fn assign_details(&mut self, path: &[String], value: &str) {
        if ends_with(path, &["RmtInf", "Ustrd"]) || ends_with(path, &["CdtrRefInf", "Ref"]) {
            self.remittance.push(value.to_string());
        } else if ends_with(path, &["Refs", "EndToEndId"]) {
            if !value.eq_ignore_ascii_case("NOTPROVIDED") && self.end_to_end.is_none() {
                self.end_to_end = Some(value.to_string());
            }
        } else if path.iter().any(|p| p == "RltdPties") {
            if ends_with(path, &["Cdtr", "Nm"]) || ends_with(path, &["Cdtr", "Pty", "Nm"]) {
                self.creditor_name.get_or_insert_with(|| value.to_string());
            } else if ends_with(path, &["Dbtr", "Nm"]) || ends_with(path, &["Dbtr", "Pty", "Nm"]) {
                self.debtor_name.get_or_insert_with(|| value.to_string());
            } else if ends_with(path, &["CdtrAcct", "Id", "IBAN"]) {
                self.creditor_iban.get_or_insert_with(|| value.to_string());
            } else if ends_with(path, &["DbtrAcct", "Id", "IBAN"]) {
                self.debtor_iban.get_or_insert_with(|| value.to_string());
            }
        }
    }

    fn finish(self, index: usize, outcome: &mut ParseOutcome) {
        if let Some(status) = &self.status {
            if !status.eq_ignore_ascii_case("BOOK") {
                outcome.skip(format!("entry {}: not booked (status {})", index, status));
                return;
            }
        }

        let Some(magnitude) = self
            .amount
            .as_deref()
            .and_then(|a| Decimal::from_str(a.trim()).ok())
        else {
            outcome.skip(format!("entry {}: missing or invalid amount", index));
            return;
        };

        let (amount, name, iban) = match self.direction.as_deref() {
            Some("CRDT") => (magnitude, self.debtor_name, self.debtor_iban),
            Some("DBIT") => (-magnitude, self.creditor_name, self.creditor_iban),
            other => {
                outcome.skip(format!("entry {}: unknown credit/debit indicator {:?}", index, other));
                return;
            }
        };

        let Some(date) = self
            .booking_date
            .as_deref()
            .or(self.value_date.as_deref())
            .and_then(parse_date)
        else {
            outcome.skip(format!("entry {}: missing booking date", index));
            return;
        };

        let remittance = clean_text(&self.remittance.join(" "));
        let mut parts: Vec<String> = Vec::new();
        if let Some(n) = &name {
            parts.push(clean_text(n));
        }
        if !remittance.is_empty() {
            parts.push(remittance);
        } else if let Some(info) = &self.additional_info {
            parts.push(clean_text(info));
        }

        let mut txn = RawTransaction::new(date, amount, parts.join(" "));
        txn.counterparty_name = name;
        txn.counterparty_iban = iban.map(|i| i.replace(' ', ""));
        txn.reference = self.end_to_end.or(self.account_servicer_ref);
        outcome.transactions.push(txn);
    }
}

fn local_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).into_owned()
}

pub fn parse_xml(text: &str) -> Result<ParseOutcome> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut outcome = ParseOutcome::new(StatementFormat::Camt053);
    let mut path: Vec<String> = Vec::new();
    let mut entry: Option<(usize, EntryBuilder)> = None;
    let mut entry_count = 0usize;
    let mut balance_count = 0usize;

    loop {
        let event = match reader.read_event() {
            Ok(event) => event,
            Err(e) => {
                let message = format!(
                    "XML error at byte {}: {}",
                    reader.buffer_position(),
                    e
                );
                if outcome.transactions.is_empty() {
                    return Err(LedgerError::Parse(format!("CAMT.053 {}", message)));
                }
                outcome.skip(message);
                break;
            }
        };

        match event {
            Event::Start(e) => {
                let name = local_name(e.local_name().as_ref());
                if name == "Ntry" {
                    entry_count += 1;
                    entry = Some((entry_count, EntryBuilder::default()));
                }
                path.push(name);
            }
            Event::End(e) => {
                let name = local_name(e.local_name().as_ref());
                path.pop();
                match name.as_str() {
                    "Ntry" => {
                        if let Some((index, builder)) = entry.take() {
                            builder.finish(index, &mut outcome);
                        }
                    }
                    "Bal" => {
                        balance_count += 1;
                        outcome.skip(format!("balance element {}", balance_count));
                    }
                    _ => {}
                }
            }
            Event::Text(t) => {
                let value = t
                    .unescape()
                    .map(|v| v.into_owned())
                    .unwrap_or_else(|_| String::from_utf8_lossy(&t).into_owned());
                on_text(&path, &mut entry, &mut outcome, value.trim());
            }
            Event::CData(c) => {
                let value = String::from_utf8_lossy(&c).into_owned();
                on_text(&path, &mut entry, &mut outcome, value.trim());
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(outcome)
}

fn on_text(
    path: &[String],
    entry: &mut Option<(usize, EntryBuilder)>,
    outcome: &mut ParseOutcome,
    value: &str,
) {
    if let Some((_, builder)) = entry.as_mut() {
        if let Some(pos) = path.iter().rposition(|p| p == "Ntry") {
            builder.assign(&path[pos + 1..], value);
        }
        return;
    }
    // Statement account, outside any entry
    if outcome.source.is_none() && ends_with(path, &["Stmt", "Acct", "Id", "IBAN"]) {
        outcome.source = Some(format!("CAMT.053 {}", value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Document xmlns="urn:iso:std:iso:20022:tech:xsd:camt.053.001.02">
  <BkToCstmrStmt>
    <Stmt>
      <Id>2024-01</Id>
      <Acct><Id><IBAN>NL69INGB0123456789</IBAN></Id></Acct>
      <Bal>
        <Tp><CdOrPrtry><Cd>OPBD</Cd></CdOrPrtry></Tp>
        <Amt Ccy="EUR">1000.00</Amt>
        <CdtDbtInd>CRDT</CdtDbtInd>
        <Dt><Dt>2024-01-01</Dt></Dt>
      </Bal>
      <Ntry>
        <Amt Ccy="EUR">12.50</Amt>
        <CdtDbtInd>DBIT</CdtDbtInd>
        <Sts>BOOK</Sts>
        <BookgDt><Dt>2024-01-02</Dt></BookgDt>
        <ValDt><Dt>2024-01-02</Dt></ValDt>
        <AcctSvcrRef>REF-1</AcctSvcrRef>
        <NtryDtls><TxDtls>
          <Refs><EndToEndId>NOTPROVIDED</EndToEndId></Refs>
          <RltdPties>
            <Cdtr><Nm>KPN B.V.</Nm></Cdtr>
            <CdtrAcct><Id><IBAN>NL80RABO0123456789</IBAN></Id></CdtrAcct>
          </RltdPties>
          <RmtInf><Ustrd>Factuur 2024-001 internet</Ustrd></RmtInf>
        </TxDtls></NtryDtls>
      </Ntry>
      <Ntry>
        <Amt Ccy="EUR">1500.00</Amt>
        <CdtDbtInd>CRDT</CdtDbtInd>
        <Sts>BOOK</Sts>
        <BookgDt><Dt>2024-01-03</Dt></BookgDt>
        <NtryDtls><TxDtls>
          <Refs><EndToEndId>E2E-17</EndToEndId></Refs>
          <RltdPties>
            <Dbtr><Nm>Klant &amp; Zn BV</Nm></Dbtr>
            <DbtrAcct><Id><IBAN>NL91ABNA0417164300</IBAN></Id></DbtrAcct>
          </RltdPties>
          <RmtInf><Ustrd>Betaling factuur 17</Ustrd></RmtInf>
        </TxDtls></NtryDtls>
      </Ntry>
      <Ntry>
        <Amt Ccy="EUR">20.00</Amt>
        <CdtDbtInd>DBIT</CdtDbtInd>
        <Sts>PDNG</Sts>
        <BookgDt><Dt>2024-01-04</Dt></BookgDt>
      </Ntry>
      <Ntry>
        <CdtDbtInd>DBIT</CdtDbtInd>
        <BookgDt><Dt>2024-01-04</Dt></BookgDt>
      </Ntry>
      <Bal>
        <Tp><CdOrPrtry><Cd>CLBD</Cd></CdOrPrtry></Tp>
        <Amt Ccy="EUR">2487.50</Amt>
        <CdtDbtInd>CRDT</CdtDbtInd>
        <Dt><Dt>2024-01-04</Dt></Dt>
      </Bal>
    </Stmt>
  </BkToCstmrStmt>
</Document>"#;

    #[test]
    fn test_parse_camt053_entries() {
        let outcome = parse_xml(SAMPLE).unwrap();
        assert_eq!(outcome.transactions.len(), 2);
        // two balances, one pending entry, one entry without amount
        assert_eq!(outcome.skipped, 4);
        assert_eq!(outcome.source.as_deref(), Some("CAMT.053 NL69INGB0123456789"));

        let debit = &outcome.transactions[0];
        assert_eq!(debit.date, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(debit.amount, Decimal::from_str("-12.50").unwrap());
        assert_eq!(debit.description, "KPN B.V. Factuur 2024-001 internet");
        assert_eq!(debit.counterparty_iban.as_deref(), Some("NL80RABO0123456789"));
        assert_eq!(debit.reference.as_deref(), Some("REF-1"));

        let credit = &outcome.transactions[1];
        assert_eq!(credit.amount, Decimal::from_str("1500").unwrap());
        assert_eq!(credit.counterparty_name.as_deref(), Some("Klant & Zn BV"));
        assert_eq!(credit.reference.as_deref(), Some("E2E-17"));
    }

    #[test]
    fn test_broken_xml_without_entries_is_a_parse_error() {
        let result = parse_xml("<?xml version=\"1.0\"?><Document><Stmt></Document>");
        assert!(matches!(result, Err(LedgerError::Parse(_))));
    }
}
