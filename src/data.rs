//! Raw order ingestion and RFML feature computation using Polars

use crate::error::RfmlError;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use linfa::traits::{Fit, Transformer};
use linfa::DatasetBase;
use linfa_preprocessing::linear_scaling::LinearScaler;
use ndarray::Array2;
use polars::prelude::*;
use tracing::debug;

/// Raw order columns
pub const CUSTOMER_ID: &str = "customer_unique_id";
pub const FIRST_PURCHASE: &str = "first-purchase";
pub const ORDER_PURCHASED: &str = "order_purchase_timestamp";
pub const ORDER_DELIVERED: &str = "order_delivered_customer_date";
pub const PAYMENT: &str = "payment_value";
pub const PRICE: &str = "price";
pub const FREIGHT: &str = "freight_value";
pub const FREQUENCY_OVERRIDE: &str = "frequency";

/// Customer RFML columns
pub const RECENCY: &str = "Recency";
pub const FREQUENCY: &str = "Frequency";
pub const MONETARY: &str = "Monetary";
pub const LOYALTY: &str = "Loyalty";
pub const TOTAL_SALES: &str = "total_sales";
pub const CLUSTER_LABEL: &str = "cluster_label";

/// Model input columns, in matrix order
pub const RFML_COLUMNS: [&str; 4] = [RECENCY, FREQUENCY, MONETARY, LOYALTY];

/// Identifier given to every row when the raw table has no customer column
pub const SINGLE_CUSTOMER_ID: &str = "single_user";

const MS_PER_DAY: i64 = 86_400_000;

// Aggregation outputs
const LAST_INTERACT: &str = "last_interact";
const LAST_FIRST_PURCHASE: &str = "first_purchase";
const LAST_PURCHASE: &str = "last_purchase";
const ORDER_COUNT: &str = "order_count";
const PAYMENT_SUM: &str = "monetary";
const PRICE_SUM: &str = "total_price";
const FREIGHT_SUM: &str = "total_freight";

/// One purchase event as collected by a front end
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawOrder {
    pub customer_id: Option<String>,
    pub first_purchase: String,
    pub order_purchased: String,
    pub order_delivered: String,
    pub payment_value: f64,
    pub price: Option<f64>,
    pub freight_value: Option<f64>,
    /// User-declared purchase count, replaces the computed order count
    pub frequency: Option<f64>,
}

/// Build a raw order table from typed rows.
///
/// Optional columns are only materialized when at least one row carries a
/// value, so a single form submission maps onto the same defaults the
/// feature builder applies to a missing column.
pub fn orders_frame(orders: &[RawOrder]) -> crate::Result<DataFrame> {
    let mut columns = Vec::with_capacity(8);

    if orders.iter().any(|o| o.customer_id.is_some()) {
        let ids: Vec<Option<String>> = orders.iter().map(|o| o.customer_id.clone()).collect();
        columns.push(Series::new(CUSTOMER_ID, ids));
    }

    let first: Vec<&str> = orders.iter().map(|o| o.first_purchase.as_str()).collect();
    let purchased: Vec<&str> = orders.iter().map(|o| o.order_purchased.as_str()).collect();
    let delivered: Vec<&str> = orders.iter().map(|o| o.order_delivered.as_str()).collect();
    let payments: Vec<f64> = orders.iter().map(|o| o.payment_value).collect();
    columns.push(Series::new(FIRST_PURCHASE, first));
    columns.push(Series::new(ORDER_PURCHASED, purchased));
    columns.push(Series::new(ORDER_DELIVERED, delivered));
    columns.push(Series::new(PAYMENT, payments));

    let optional = [
        (PRICE, orders.iter().map(|o| o.price).collect::<Vec<_>>()),
        (FREIGHT, orders.iter().map(|o| o.freight_value).collect()),
        (FREQUENCY_OVERRIDE, orders.iter().map(|o| o.frequency).collect()),
    ];
    for (name, values) in optional {
        if values.iter().any(Option::is_some) {
            columns.push(Series::new(name, values));
        }
    }

    Ok(DataFrame::new(columns)?)
}

/// RFML features for one customer
#[derive(Debug, Clone, PartialEq)]
pub struct CustomerRfml {
    pub customer_id: String,
    /// Days between the batch reference date and the last delivery
    pub recency: i64,
    pub frequency: f64,
    pub monetary: f64,
    /// Days between first purchase and last order, per order
    pub loyalty: f64,
    /// Price plus freight, present when the raw table carried either
    pub total_sales: Option<f64>,
}

impl CustomerRfml {
    /// Feature vector in `RFML_COLUMNS` order
    pub fn features(&self) -> [f64; 4] {
        [
            self.recency as f64,
            self.frequency,
            self.monetary,
            self.loyalty,
        ]
    }
}

/// Stateless transform from raw orders to one RFML row per customer
#[derive(Debug, Clone, Copy, Default)]
pub struct RfmlBuilder;

impl RfmlBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Aggregate raw orders into the RFML table.
    ///
    /// The output keeps customers in order of first appearance and carries
    /// `total_sales` only when the input had a `price` or `freight_value`
    /// column.
    pub fn build(&self, raw: &DataFrame) -> crate::Result<DataFrame> {
        let (records, with_target) = aggregate(raw)?;
        records_frame(&records, with_target)
    }

    /// Same as [`RfmlBuilder::build`]
    pub fn transform(&self, raw: &DataFrame) -> crate::Result<DataFrame> {
        self.build(raw)
    }

    /// Typed view of [`RfmlBuilder::build`]
    pub fn build_records(&self, raw: &DataFrame) -> crate::Result<Vec<CustomerRfml>> {
        aggregate(raw).map(|(records, _)| records)
    }
}

fn aggregate(raw: &DataFrame) -> crate::Result<(Vec<CustomerRfml>, bool)> {
    let with_target = has_column(raw, PRICE) || has_column(raw, FREIGHT);

    let delivered = parse_dates(raw, ORDER_DELIVERED)?;
    let first_purchase = parse_dates(raw, FIRST_PURCHASE)?;
    let purchased = parse_dates(raw, ORDER_PURCHASED)?;
    let payments = numeric_values(required_column(raw, PAYMENT)?)?;
    let prices = optional_numeric(raw, PRICE)?;
    let freights = optional_numeric(raw, FREIGHT)?;
    let ids = customer_ids(raw)?;
    let frequency_override = frequency_override(raw)?;

    let Some(reference) = delivered.iter().copied().max() else {
        return Ok((Vec::new(), with_target));
    };

    // Null identifiers still count towards the reference date but form no group
    let rows: Vec<usize> = (0..raw.height()).filter(|&i| ids[i].is_some()).collect();
    let pick_i64 = |values: &[i64]| rows.iter().map(|&i| values[i]).collect::<Vec<i64>>();
    let pick_f64 = |values: &[f64]| rows.iter().map(|&i| values[i]).collect::<Vec<f64>>();
    let grouped_ids: Vec<&str> = rows.iter().filter_map(|&i| ids[i].as_deref()).collect();

    let orders = DataFrame::new(vec![
        Series::new(CUSTOMER_ID, grouped_ids),
        Series::new(ORDER_DELIVERED, pick_i64(&delivered)),
        Series::new(FIRST_PURCHASE, pick_i64(&first_purchase)),
        Series::new(ORDER_PURCHASED, pick_i64(&purchased)),
        Series::new(PAYMENT, pick_f64(&payments)),
        Series::new(PRICE, pick_f64(&prices)),
        Series::new(FREIGHT, pick_f64(&freights)),
    ])?;

    let agg = orders
        .lazy()
        .group_by_stable([col(CUSTOMER_ID)])
        .agg([
            col(ORDER_DELIVERED).max().alias(LAST_INTERACT),
            col(FIRST_PURCHASE).max().alias(LAST_FIRST_PURCHASE),
            col(ORDER_PURCHASED).max().alias(LAST_PURCHASE),
            col(ORDER_PURCHASED).count().alias(ORDER_COUNT),
            col(PAYMENT).sum().alias(PAYMENT_SUM),
            col(PRICE).sum().alias(PRICE_SUM),
            col(FREIGHT).sum().alias(FREIGHT_SUM),
        ])
        .collect()?;

    let customer_ids: Vec<String> = agg
        .column(CUSTOMER_ID)?
        .str()?
        .into_iter()
        .map(|id| id.unwrap_or_default().to_string())
        .collect();
    let last_interact = int_values(&agg, LAST_INTERACT)?;
    let first_purchase = int_values(&agg, LAST_FIRST_PURCHASE)?;
    let last_purchase = int_values(&agg, LAST_PURCHASE)?;
    let order_count = int_values(&agg, ORDER_COUNT)?;
    let monetary = numeric_values(agg.column(PAYMENT_SUM)?)?;
    let total_price = numeric_values(agg.column(PRICE_SUM)?)?;
    let total_freight = numeric_values(agg.column(FREIGHT_SUM)?)?;

    let records: Vec<CustomerRfml> = customer_ids
        .into_iter()
        .enumerate()
        .map(|(i, customer_id)| {
            let frequency = frequency_override.unwrap_or(order_count[i] as f64);
            let loyalty = if frequency == 0.0 {
                0.0
            } else {
                days_between(first_purchase[i], last_purchase[i]) as f64 / frequency
            };

            CustomerRfml {
                customer_id,
                recency: days_between(last_interact[i], reference),
                frequency,
                monetary: monetary[i],
                loyalty,
                total_sales: with_target.then(|| total_price[i] + total_freight[i]),
            }
        })
        .collect();

    debug!(
        orders = raw.height(),
        customers = records.len(),
        frequency_override = ?frequency_override,
        "Aggregated raw orders into RFML rows"
    );

    Ok((records, with_target))
}

/// Assemble the RFML table from typed rows
fn records_frame(records: &[CustomerRfml], with_target: bool) -> crate::Result<DataFrame> {
    let ids: Vec<&str> = records.iter().map(|r| r.customer_id.as_str()).collect();
    let recency: Vec<i64> = records.iter().map(|r| r.recency).collect();
    let frequency: Vec<f64> = records.iter().map(|r| r.frequency).collect();
    let monetary: Vec<f64> = records.iter().map(|r| r.monetary).collect();
    let loyalty: Vec<f64> = records.iter().map(|r| r.loyalty).collect();

    let mut columns = vec![
        Series::new(CUSTOMER_ID, ids),
        Series::new(RECENCY, recency),
        Series::new(FREQUENCY, frequency),
        Series::new(MONETARY, monetary),
        Series::new(LOYALTY, loyalty),
    ];
    if with_target {
        let sales: Vec<f64> = records
            .iter()
            .map(|r| r.total_sales.unwrap_or_default())
            .collect();
        columns.push(Series::new(TOTAL_SALES, sales));
    }

    Ok(DataFrame::new(columns)?)
}

/// Extract the `[Recency, Frequency, Monetary, Loyalty]` matrix from an RFML table
pub fn rfml_matrix(df: &DataFrame) -> crate::Result<Array2<f64>> {
    let mut features = Array2::zeros((df.height(), RFML_COLUMNS.len()));

    for (j, name) in RFML_COLUMNS.iter().enumerate() {
        let series = required_column(df, name)?.cast(&DataType::Float64)?;
        for (i, value) in series.f64()?.into_iter().enumerate() {
            features[[i, j]] = value.ok_or_else(|| {
                RfmlError::schema(format!("column `{name}` has a null at row {i}"))
            })?;
        }
    }

    Ok(features)
}

/// Extract a numeric column, such as `total_sales`, as regression targets
pub fn target_values(df: &DataFrame, name: &str) -> crate::Result<Vec<f64>> {
    let series = required_column(df, name)?.cast(&DataType::Float64)?;
    series
        .f64()?
        .into_iter()
        .enumerate()
        .map(|(i, value)| match value {
            Some(v) if v.is_finite() => Ok(v),
            _ => Err(RfmlError::schema(format!(
                "column `{name}` has a missing or non-finite value at row {i}"
            ))),
        })
        .collect()
}

/// Per-feature standardization to zero mean and unit variance, frozen at fit time.
///
/// Wraps linfa's standard [`LinearScaler`]; constant features keep a unit scale
/// and map to 0.
#[derive(Debug)]
pub struct StandardScaler {
    scaler: LinearScaler<f64>,
    n_features: usize,
}

impl StandardScaler {
    /// Fit on raw feature rows
    ///
    /// # Arguments
    /// * `features` - Raw matrix, one row per customer
    ///
    /// # Returns
    /// * Fitted scaler, or an error when `features` has no rows
    pub fn fit(features: &Array2<f64>) -> crate::Result<Self> {
        let dataset = DatasetBase::from(features.clone());
        let scaler = LinearScaler::standard().fit(&dataset)?;
        Ok(Self {
            scaler,
            n_features: features.ncols(),
        })
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    /// Apply the frozen parameters to new rows
    pub fn transform(&self, features: &Array2<f64>) -> crate::Result<Array2<f64>> {
        if features.ncols() != self.n_features {
            return Err(RfmlError::ShapeMismatch {
                expected: self.n_features,
                actual: features.ncols(),
            });
        }
        Ok(self.scaler.transform(features.to_owned()))
    }
}

fn has_column(df: &DataFrame, name: &str) -> bool {
    df.column(name).is_ok()
}

fn required_column<'a>(df: &'a DataFrame, name: &str) -> crate::Result<&'a Series> {
    df.column(name)
        .map_err(|_| RfmlError::schema(format!("missing required column `{name}`")))
}

fn numeric_values(series: &Series) -> crate::Result<Vec<f64>> {
    let cast = series.strict_cast(&DataType::Float64).map_err(|_| {
        RfmlError::schema(format!(
            "column `{}` must be numeric, found {}",
            series.name(),
            series.dtype()
        ))
    })?;
    let values = cast
        .f64()?
        .into_iter()
        .map(|v| v.unwrap_or_default())
        .collect();
    Ok(values)
}

fn optional_numeric(df: &DataFrame, name: &str) -> crate::Result<Vec<f64>> {
    match df.column(name) {
        Ok(series) => numeric_values(series),
        Err(_) => Ok(vec![0.0; df.height()]),
    }
}

fn int_values(df: &DataFrame, name: &str) -> crate::Result<Vec<i64>> {
    let series = df.column(name)?.cast(&DataType::Int64)?;
    let values = series
        .i64()?
        .into_iter()
        .map(|v| v.unwrap_or_default())
        .collect();
    Ok(values)
}

fn customer_ids(df: &DataFrame) -> crate::Result<Vec<Option<String>>> {
    let Ok(series) = df.column(CUSTOMER_ID) else {
        return Ok(vec![Some(SINGLE_CUSTOMER_ID.to_string()); df.height()]);
    };
    let ids = series.cast(&DataType::String)?;
    let values = ids
        .str()?
        .into_iter()
        .map(|id| id.map(str::to_string))
        .collect();
    Ok(values)
}

/// First non-null value of the `frequency` column, if any.
///
/// This is not a strict first-row lookup: a null first row does not disable
/// the override, the first non-null value further down is used instead.
fn frequency_override(df: &DataFrame) -> crate::Result<Option<f64>> {
    let Ok(series) = df.column(FREQUENCY_OVERRIDE) else {
        return Ok(None);
    };
    let values = series.strict_cast(&DataType::Float64).map_err(|_| {
        RfmlError::schema(format!(
            "column `{FREQUENCY_OVERRIDE}` must be numeric, found {}",
            series.dtype()
        ))
    })?;
    let first = values.f64()?.into_iter().flatten().next();
    Ok(first)
}

/// Read a date column as epoch milliseconds, failing on the first null or bad cell.
///
/// String cells are parsed with [`parse_timestamp`]; `Date` and `Datetime`
/// columns are converted directly.
fn parse_dates(df: &DataFrame, name: &str) -> crate::Result<Vec<i64>> {
    let series = required_column(df, name)?;
    match series.dtype() {
        DataType::String => parse_date_strings(series, name),
        DataType::Date => epoch_millis(
            series,
            &DataType::Datetime(TimeUnit::Milliseconds, None),
            name,
        ),
        DataType::Datetime(_, tz) => epoch_millis(
            series,
            &DataType::Datetime(TimeUnit::Milliseconds, tz.clone()),
            name,
        ),
        other => Err(RfmlError::schema(format!(
            "column `{name}` must hold dates or date strings, found {other}"
        ))),
    }
}

fn parse_date_strings(series: &Series, name: &str) -> crate::Result<Vec<i64>> {
    series
        .str()?
        .into_iter()
        .enumerate()
        .map(|(row, cell)| {
            cell.and_then(parse_timestamp).ok_or_else(|| RfmlError::Parse {
                column: name.to_string(),
                row,
                value: cell.map(str::to_string),
            })
        })
        .collect()
}

fn epoch_millis(series: &Series, millis_type: &DataType, name: &str) -> crate::Result<Vec<i64>> {
    let millis = series.cast(millis_type)?.cast(&DataType::Int64)?;
    millis
        .i64()?
        .into_iter()
        .enumerate()
        .map(|(row, cell)| {
            cell.ok_or_else(|| RfmlError::Parse {
                column: name.to_string(),
                row,
                value: None,
            })
        })
        .collect()
}

/// Parse an RFC 3339, `YYYY-MM-DD HH:MM:SS[.f]` or `YYYY-MM-DD` string to epoch milliseconds
pub fn parse_timestamp(value: &str) -> Option<i64> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.timestamp_millis());
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Some(dt.and_utc().timestamp_millis());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp_millis())
}

/// Whole days from `from` to `to`, floored
fn days_between(from: i64, to: i64) -> i64 {
    (to - from).div_euclid(MS_PER_DAY)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario_a() -> DataFrame {
        df!(
            CUSTOMER_ID => &["u1", "u1", "u1"],
            FIRST_PURCHASE => &["2018-01-01", "2018-01-01", "2018-01-01"],
            ORDER_PURCHASED => &["2018-01-01 09:00:00", "2018-01-05 12:00:00", "2018-01-11 09:00:00"],
            ORDER_DELIVERED => &["2018-01-04 10:00:00", "2018-01-09 10:00:00", "2018-01-15 10:00:00"],
            PAYMENT => &[10.0, 20.0, 30.0],
            PRICE => &[5.0, 5.0, 5.0],
            FREIGHT => &[1.0, 1.0, 1.0]
        )
        .unwrap()
    }

    #[test]
    fn test_single_customer_aggregation() {
        let records = RfmlBuilder::new().build_records(&scenario_a()).unwrap();

        assert_eq!(records.len(), 1);
        let u1 = &records[0];
        assert_eq!(u1.customer_id, "u1");
        assert_eq!(u1.recency, 0);
        assert_eq!(u1.frequency, 3.0);
        assert_eq!(u1.monetary, 60.0);
        assert_eq!(u1.total_sales, Some(18.0));
        assert!((u1.loyalty - 10.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_build_frame_schema() {
        let frame = RfmlBuilder::new().build(&scenario_a()).unwrap();
        let names: Vec<&str> = frame.get_column_names();
        assert_eq!(
            names,
            vec![CUSTOMER_ID, RECENCY, FREQUENCY, MONETARY, LOYALTY, TOTAL_SALES]
        );
        assert_eq!(frame.height(), 1);
    }

    #[test]
    fn test_missing_customer_column_uses_sentinel() {
        let raw = df!(
            FIRST_PURCHASE => &["2017-05-01"],
            ORDER_PURCHASED => &["2017-06-01"],
            ORDER_DELIVERED => &["2017-06-10"],
            PAYMENT => &[99.9]
        )
        .unwrap();

        let records = RfmlBuilder::new().build_records(&raw).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].customer_id, SINGLE_CUSTOMER_ID);
        assert_eq!(records[0].frequency, 1.0);
        assert_eq!(records[0].loyalty, 31.0);
        assert_eq!(records[0].total_sales, None);

        let frame = RfmlBuilder::new().build(&raw).unwrap();
        assert!(frame.column(TOTAL_SALES).is_err());
    }

    #[test]
    fn test_recency_against_batch_reference() {
        let raw = df!(
            CUSTOMER_ID => &["a", "b", "a"],
            FIRST_PURCHASE => &["2018-01-01", "2018-02-01", "2018-01-01"],
            ORDER_PURCHASED => &["2018-01-02", "2018-02-02", "2018-03-01"],
            ORDER_DELIVERED => &["2018-01-10", "2018-02-10", "2018-03-11"],
            PAYMENT => &[1.0, 2.0, 3.0]
        )
        .unwrap();

        let records = RfmlBuilder::new().build_records(&raw).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].customer_id, "a");
        assert_eq!(records[0].recency, 0);
        assert_eq!(records[0].frequency, 2.0);
        assert_eq!(records[1].customer_id, "b");
        assert_eq!(records[1].recency, 29);
        assert_eq!(records[1].monetary, 2.0);
    }

    #[test]
    fn test_frequency_override_applies_to_all() {
        let raw = df!(
            CUSTOMER_ID => &["a", "b", "b"],
            FIRST_PURCHASE => &["2018-01-01", "2018-01-01", "2018-01-01"],
            ORDER_PURCHASED => &["2018-01-11", "2018-01-05", "2018-01-21"],
            ORDER_DELIVERED => &["2018-01-12", "2018-01-06", "2018-01-22"],
            PAYMENT => &[1.0, 2.0, 3.0],
            FREQUENCY_OVERRIDE => &[None, Some(5.0), None]
        )
        .unwrap();

        let records = RfmlBuilder::new().build_records(&raw).unwrap();
        assert!(records.iter().all(|r| r.frequency == 5.0));
        assert_eq!(records[0].loyalty, 2.0);
        assert_eq!(records[1].loyalty, 4.0);
    }

    #[test]
    fn test_all_null_override_is_ignored() {
        let raw = df!(
            FIRST_PURCHASE => &["2018-01-01", "2018-01-01"],
            ORDER_PURCHASED => &["2018-01-02", "2018-01-03"],
            ORDER_DELIVERED => &["2018-01-04", "2018-01-05"],
            PAYMENT => &[1.0, 1.0],
            FREQUENCY_OVERRIDE => &[None::<f64>, None]
        )
        .unwrap();

        let records = RfmlBuilder::new().build_records(&raw).unwrap();
        assert_eq!(records[0].frequency, 2.0);
    }

    #[test]
    fn test_zero_frequency_gives_zero_loyalty() {
        let raw = df!(
            FIRST_PURCHASE => &["2018-01-01"],
            ORDER_PURCHASED => &["2018-03-01"],
            ORDER_DELIVERED => &["2018-03-04"],
            PAYMENT => &[10.0],
            FREQUENCY_OVERRIDE => &[0.0]
        )
        .unwrap();

        let records = RfmlBuilder::new().build_records(&raw).unwrap();
        assert_eq!(records[0].frequency, 0.0);
        assert_eq!(records[0].loyalty, 0.0);
    }

    #[test]
    fn test_empty_input_gives_empty_output() {
        let raw = df!(
            CUSTOMER_ID => Vec::<&str>::new(),
            FIRST_PURCHASE => Vec::<&str>::new(),
            ORDER_PURCHASED => Vec::<&str>::new(),
            ORDER_DELIVERED => Vec::<&str>::new(),
            PAYMENT => Vec::<f64>::new()
        )
        .unwrap();

        let frame = RfmlBuilder::new().build(&raw).unwrap();
        assert_eq!(frame.height(), 0);
        assert!(frame.column(RECENCY).is_ok());
    }

    #[test]
    fn test_missing_payment_is_schema_error() {
        let raw = df!(
            FIRST_PURCHASE => &["2018-01-01"],
            ORDER_PURCHASED => &["2018-01-02"],
            ORDER_DELIVERED => &["2018-01-03"]
        )
        .unwrap();

        let err = RfmlBuilder::new().build(&raw).unwrap_err();
        assert!(matches!(err, RfmlError::Schema(_)));
    }

    #[test]
    fn test_bad_date_is_parse_error() {
        let raw = df!(
            FIRST_PURCHASE => &["2018-01-01", "2018-01-01"],
            ORDER_PURCHASED => &["2018-01-02", "not a date"],
            ORDER_DELIVERED => &["2018-01-03", "2018-01-04"],
            PAYMENT => &[1.0, 2.0]
        )
        .unwrap();

        match RfmlBuilder::new().build(&raw) {
            Err(RfmlError::Parse { column, row, value }) => {
                assert_eq!(column, ORDER_PURCHASED);
                assert_eq!(row, 1);
                assert_eq!(value.as_deref(), Some("not a date"));
            }
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_null_customer_rows_are_not_grouped() {
        let raw = df!(
            CUSTOMER_ID => &[Some("a"), None],
            FIRST_PURCHASE => &["2018-01-01", "2018-01-01"],
            ORDER_PURCHASED => &["2018-01-02", "2018-01-02"],
            ORDER_DELIVERED => &["2018-01-03", "2018-01-13"],
            PAYMENT => &[1.0, 2.0]
        )
        .unwrap();

        let records = RfmlBuilder::new().build_records(&raw).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].recency, 10);
    }

    #[test]
    fn test_orders_frame_round_trips_through_builder() {
        let order = RawOrder {
            first_purchase: "2018-01-01".to_string(),
            order_purchased: "2018-01-21".to_string(),
            order_delivered: "2018-01-25".to_string(),
            payment_value: 120.0,
            frequency: Some(4.0),
            ..Default::default()
        };

        let raw = orders_frame(&[order]).unwrap();
        assert!(raw.column(CUSTOMER_ID).is_err());
        assert!(raw.column(PRICE).is_err());

        let records = RfmlBuilder::new().build_records(&raw).unwrap();
        assert_eq!(records[0].customer_id, SINGLE_CUSTOMER_ID);
        assert_eq!(records[0].frequency, 4.0);
        assert_eq!(records[0].loyalty, 5.0);
    }

    #[test]
    fn test_typed_date_columns() {
        let date = |d: u32| NaiveDate::from_ymd_opt(2018, 1, d).unwrap();
        let at = |d: u32, h: u32| date(d).and_hms_opt(h, 0, 0).unwrap();

        let mut raw = scenario_a();
        raw.with_column(Series::new(FIRST_PURCHASE, vec![date(1), date(1), date(1)]))
            .unwrap();
        let purchased = Series::new(ORDER_PURCHASED, vec![at(1, 9), at(5, 12), at(11, 9)])
            .cast(&DataType::Datetime(TimeUnit::Microseconds, None))
            .unwrap();
        raw.with_column(purchased).unwrap();
        assert_eq!(raw.column(FIRST_PURCHASE).unwrap().dtype(), &DataType::Date);

        let typed = RfmlBuilder::new().build_records(&raw).unwrap();
        let parsed = RfmlBuilder::new().build_records(&scenario_a()).unwrap();
        assert_eq!(typed, parsed);
        assert!((typed[0].loyalty - 10.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_null_typed_date_is_parse_error() {
        let mut raw = scenario_a();
        let first = NaiveDate::from_ymd_opt(2018, 1, 1).unwrap();
        raw.with_column(Series::new(FIRST_PURCHASE, &[Some(first), None, Some(first)]))
            .unwrap();

        match RfmlBuilder::new().build(&raw) {
            Err(RfmlError::Parse { column, row, value }) => {
                assert_eq!(column, FIRST_PURCHASE);
                assert_eq!(row, 1);
                assert_eq!(value, None);
            }
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_numeric_date_column_is_schema_error() {
        let mut raw = scenario_a();
        raw.with_column(Series::new(ORDER_DELIVERED, &[1i64, 2, 3])).unwrap();
        assert!(matches!(
            RfmlBuilder::new().build(&raw),
            Err(RfmlError::Schema(_))
        ));
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let day = parse_timestamp("2018-01-02").unwrap();
        assert_eq!(parse_timestamp("2018-01-02 00:00:00"), Some(day));
        assert_eq!(parse_timestamp("2018-01-02T00:00:00"), Some(day));
        assert_eq!(parse_timestamp("2018-01-02T00:00:00Z"), Some(day));
        assert_eq!(parse_timestamp("2018-01-02 00:00:00.000"), Some(day));
        assert_eq!(parse_timestamp("02/01/2018"), None);
    }

    #[test]
    fn test_rfml_matrix_requires_columns() {
        let frame = RfmlBuilder::new().build(&scenario_a()).unwrap();
        let matrix = rfml_matrix(&frame).unwrap();
        assert_eq!(matrix.shape(), &[1, 4]);
        assert_eq!(matrix[[0, 2]], 60.0);

        let partial = frame.drop(LOYALTY).unwrap();
        assert!(matches!(rfml_matrix(&partial), Err(RfmlError::Schema(_))));
    }

    #[test]
    fn test_standard_scaler() {
        let raw = Array2::from_shape_vec((3, 2), vec![1.0, 5.0, 2.0, 5.0, 3.0, 5.0]).unwrap();
        let scaler = StandardScaler::fit(&raw).unwrap();
        assert_eq!(scaler.n_features(), 2);

        let scaled = scaler.transform(&raw).unwrap();
        assert!((scaled[[0, 0]] + 1.224744871391589).abs() < 1e-9);
        assert!(scaled[[1, 0]].abs() < 1e-12);
        assert!((scaled[[2, 0]] - 1.224744871391589).abs() < 1e-9);

        // Constant feature
        assert!(scaled.column(1).iter().all(|v| *v == 0.0));

        let unseen = Array2::from_shape_vec((1, 2), vec![4.0, 7.0]).unwrap();
        let scaled = scaler.transform(&unseen).unwrap();
        assert!(scaled.iter().all(|v| v.is_finite()));

        let wrong = Array2::zeros((1, 3));
        assert!(matches!(
            scaler.transform(&wrong),
            Err(RfmlError::ShapeMismatch { expected: 2, actual: 3 })
        ));
    }

    #[test]
    fn test_standard_scaler_needs_rows() {
        let empty = Array2::<f64>::zeros((0, 4));
        assert!(matches!(
            StandardScaler::fit(&empty),
            Err(RfmlError::Scaling(_))
        ));
    }
}
