//! Federal income tax for a single tax year (2022 tables).
//!
//! Ordinary income is taxed through marginal brackets after the standard
//! deduction. Long-term capital gains are stacked on top of ordinary income, so
//! the gains bracket depends on `ordinary + gains`, not on gains alone.

use serde::Serialize;

use super::types::FilingStatus;

/// Share of benefits that can ever be taxable.
pub const SS_MAX_TAXABLE_SHARE: f64 = 0.85;

#[derive(Debug, Clone, Copy)]
struct Bracket {
    floor: f64,
    rate: f64,
}

#[derive(Debug)]
struct TaxTable {
    standard_deduction: f64,
    ordinary: [Bracket; 7],
    capital_gains: [Bracket; 3],
    ss_base_amounts: (f64, f64),
}

const fn b(floor: f64, rate: f64) -> Bracket {
    Bracket { floor, rate }
}

const SINGLE: TaxTable = TaxTable {
    standard_deduction: 12_950.0,
    ordinary: [
        b(0.0, 0.10),
        b(10_275.0, 0.12),
        b(41_775.0, 0.22),
        b(89_075.0, 0.24),
        b(170_050.0, 0.32),
        b(215_950.0, 0.35),
        b(539_900.0, 0.37),
    ],
    capital_gains: [b(0.0, 0.0), b(41_675.0, 0.15), b(459_750.0, 0.20)],
    ss_base_amounts: (25_000.0, 34_000.0),
};

const MARRIED_JOINT: TaxTable = TaxTable {
    standard_deduction: 25_900.0,
    ordinary: [
        b(0.0, 0.10),
        b(20_550.0, 0.12),
        b(83_550.0, 0.22),
        b(178_150.0, 0.24),
        b(340_100.0, 0.32),
        b(431_900.0, 0.35),
        b(647_850.0, 0.37),
    ],
    capital_gains: [b(0.0, 0.0), b(83_350.0, 0.15), b(517_200.0, 0.20)],
    ss_base_amounts: (32_000.0, 44_000.0),
};

// Base amounts assume the spouses lived together at some point in the year.
const MARRIED_SEPARATE: TaxTable = TaxTable {
    standard_deduction: 12_950.0,
    ordinary: [
        b(0.0, 0.10),
        b(10_275.0, 0.12),
        b(41_775.0, 0.22),
        b(89_075.0, 0.24),
        b(170_050.0, 0.32),
        b(215_950.0, 0.35),
        b(323_925.0, 0.37),
    ],
    capital_gains: [b(0.0, 0.0), b(41_675.0, 0.15), b(258_600.0, 0.20)],
    ss_base_amounts: (0.0, 0.0),
};

const HEAD_OF_HOUSEHOLD: TaxTable = TaxTable {
    standard_deduction: 19_400.0,
    ordinary: [
        b(0.0, 0.10),
        b(14_650.0, 0.12),
        b(55_900.0, 0.22),
        b(89_050.0, 0.24),
        b(170_050.0, 0.32),
        b(215_950.0, 0.35),
        b(539_900.0, 0.37),
    ],
    capital_gains: [b(0.0, 0.0), b(55_800.0, 0.15), b(488_500.0, 0.20)],
    ss_base_amounts: (25_000.0, 34_000.0),
};

fn table(filing_status: FilingStatus) -> &'static TaxTable {
    match filing_status {
        FilingStatus::Single => &SINGLE,
        FilingStatus::MarriedFilingJointly => &MARRIED_JOINT,
        FilingStatus::MarriedFilingSeparately => &MARRIED_SEPARATE,
        FilingStatus::HeadOfHousehold => &HEAD_OF_HOUSEHOLD,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxDue {
    pub ordinary: f64,
    pub capital_gains: f64,
}

impl TaxDue {
    pub fn total(self) -> f64 {
        self.ordinary + self.capital_gains
    }
}

/// Tax on `ordinary_income` (gross, before the standard deduction) and on
/// long-term gains stacked above it.
pub fn tax_due(ordinary_income: f64, lt_cap_gains: f64, filing_status: FilingStatus) -> TaxDue {
    TaxDue {
        ordinary: ordinary_tax(ordinary_income, filing_status),
        capital_gains: capital_gains_tax(ordinary_income, lt_cap_gains, filing_status),
    }
}

pub fn ordinary_tax(ordinary_income: f64, filing_status: FilingStatus) -> f64 {
    let t = table(filing_status);
    let taxable = (ordinary_income - t.standard_deduction).max(0.0);
    let mut tax = 0.0;
    for (idx, bracket) in t.ordinary.iter().enumerate() {
        if taxable <= bracket.floor {
            break;
        }
        let top = t
            .ordinary
            .get(idx + 1)
            .map(|next| next.floor)
            .unwrap_or(f64::INFINITY);
        tax += bracket.rate * (taxable.min(top) - bracket.floor);
    }
    tax
}

pub fn capital_gains_tax(
    ordinary_income: f64,
    lt_cap_gains: f64,
    filing_status: FilingStatus,
) -> f64 {
    let t = table(filing_status);
    let gains = lt_cap_gains.max(0.0);
    // Deduction left over by ordinary income shelters gains first.
    let ordinary_taxable = (ordinary_income - t.standard_deduction).max(0.0);
    let total_taxable = (ordinary_income.max(0.0) + gains - t.standard_deduction).max(0.0);
    let gains_floor = ordinary_taxable.min(total_taxable);

    let mut tax = 0.0;
    for (idx, bracket) in t.capital_gains.iter().enumerate() {
        let top = t
            .capital_gains
            .get(idx + 1)
            .map(|next| next.floor)
            .unwrap_or(f64::INFINITY);
        let overlap = total_taxable.min(top) - gains_floor.max(bracket.floor);
        if overlap > 0.0 {
            tax += bracket.rate * overlap;
        }
    }
    tax
}

/// Taxable part of Social Security benefits from the two-tier provisional
/// income test. `other_income` excludes the benefits themselves.
pub fn taxable_social_security(
    other_income: f64,
    total_social_security: f64,
    filing_status: FilingStatus,
) -> f64 {
    if total_social_security <= 0.0 {
        return 0.0;
    }

    let (base1, base2) = table(filing_status).ss_base_amounts;
    let provisional = other_income.max(0.0) + 0.5 * total_social_security;

    let taxable = if provisional <= base1 {
        0.0
    } else if provisional <= base2 {
        (0.5 * (provisional - base1)).min(0.5 * total_social_security)
    } else {
        let first_tier = (0.5 * (base2 - base1)).min(0.5 * total_social_security);
        0.85 * (provisional - base2) + first_tier
    };

    taxable.min(SS_MAX_TAXABLE_SHARE * total_social_security)
}

/// Gross income at the top of the bracket taxed at `rate`, i.e. the bracket
/// ceiling plus the standard deduction. `None` for the open-ended top bracket
/// or a rate that is not in the table.
pub fn bracket_ceiling(rate: f64, filing_status: FilingStatus) -> Option<f64> {
    let t = table(filing_status);
    let idx = t
        .ordinary
        .iter()
        .position(|bracket| (bracket.rate - rate).abs() < 1e-9)?;
    let top = t.ordinary.get(idx + 1)?.floor;
    Some(top + t.standard_deduction)
}

/// Gross income at which long-term gains stop being taxed at 0%.
pub fn capital_gains_zero_rate_ceiling(filing_status: FilingStatus) -> f64 {
    let t = table(filing_status);
    t.capital_gains[1].floor + t.standard_deduction
}
