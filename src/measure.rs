//! Measure resource: body measures, daily and intraday activity, workouts.
//!
//! Field identifiers are closed enums. Parsing an unknown identifier fails
//! instead of being dropped, so a typo never silently narrows a query.
//! Response types are lenient: every field defaults when absent and data
//! fields that the API may send as `null` are `Option`s.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::context::CallContext;
use crate::envelope::Enveloped;
use crate::error::{Error, Result};
use crate::transport::{Form, Response, Transport};

const MEASURE_PATH: &str = "measure";
const MEASURE_V2_PATH: &str = "v2/measure";

/// Defines a string-valued field enum with `as_str`, `all`, `FromStr`,
/// `Display` and serde support.
macro_rules! field_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $what:literal {
            $($(#[$vmeta:meta])* $variant:ident => $value:literal,)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($(#[$vmeta])* #[serde(rename = $value)] $variant,)+
        }

        impl $name {
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $value,)+
                }
            }

            /// Every supported value.
            pub const fn all() -> &'static [Self] {
                &[$(Self::$variant,)+]
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                match s {
                    $($value => Ok(Self::$variant),)+
                    other => Err(Error::InvalidRequest(format!(concat!("unknown ", $what, ": {}"), other))),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

/// A metric tracked by Withings devices, identified by its numeric code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MeasureType {
    /// Weight (kg).
    Weight,
    /// Height (meter).
    Height,
    /// Fat free mass (kg).
    FatFreeMass,
    /// Fat ratio (%).
    FatRatio,
    /// Fat mass weight (kg).
    FatMassWeight,
    /// Diastolic blood pressure (mmHg).
    DiastolicBloodPressure,
    /// Systolic blood pressure (mmHg).
    SystolicBloodPressure,
    /// Heart pulse (bpm).
    HeartPulse,
    /// Temperature (celsius).
    Temperature,
    /// SpO2 (%).
    SpO2,
    /// Body temperature (celsius).
    BodyTemperature,
    /// Skin temperature (celsius).
    SkinTemperature,
    /// Muscle mass (kg).
    MuscleMass,
    /// Hydration (kg).
    Hydration,
    /// Bone mass (kg).
    BoneMass,
    /// Pulse wave velocity (m/s).
    PulseWaveVelocity,
    /// VO2 max (ml/min/kg).
    Vo2Max,
    /// QRS interval duration from ECG.
    QrsInterval,
    /// PR interval duration from ECG.
    PrInterval,
    /// QT interval duration from ECG.
    QtInterval,
    /// Corrected QT interval duration from ECG.
    CorrectedQtInterval,
    /// Atrial fibrillation result from PPG.
    AtrialFibrillation,
}

impl MeasureType {
    const ALL: [MeasureType; 22] = [
        Self::Weight,
        Self::Height,
        Self::FatFreeMass,
        Self::FatRatio,
        Self::FatMassWeight,
        Self::DiastolicBloodPressure,
        Self::SystolicBloodPressure,
        Self::HeartPulse,
        Self::Temperature,
        Self::SpO2,
        Self::BodyTemperature,
        Self::SkinTemperature,
        Self::MuscleMass,
        Self::Hydration,
        Self::BoneMass,
        Self::PulseWaveVelocity,
        Self::Vo2Max,
        Self::QrsInterval,
        Self::PrInterval,
        Self::QtInterval,
        Self::CorrectedQtInterval,
        Self::AtrialFibrillation,
    ];

    pub const fn code(self) -> i64 {
        match self {
            Self::Weight => 1,
            Self::Height => 4,
            Self::FatFreeMass => 5,
            Self::FatRatio => 6,
            Self::FatMassWeight => 8,
            Self::DiastolicBloodPressure => 9,
            Self::SystolicBloodPressure => 10,
            Self::HeartPulse => 11,
            Self::Temperature => 12,
            Self::SpO2 => 54,
            Self::BodyTemperature => 71,
            Self::SkinTemperature => 73,
            Self::MuscleMass => 76,
            Self::Hydration => 77,
            Self::BoneMass => 88,
            Self::PulseWaveVelocity => 91,
            Self::Vo2Max => 123,
            Self::QrsInterval => 135,
            Self::PrInterval => 136,
            Self::QtInterval => 137,
            Self::CorrectedQtInterval => 138,
            Self::AtrialFibrillation => 139,
        }
    }

    /// Every supported measure type.
    pub const fn all() -> &'static [Self] {
        &Self::ALL
    }
}

impl TryFrom<i64> for MeasureType {
    type Error = Error;

    fn try_from(code: i64) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.code() == code)
            .ok_or_else(|| Error::InvalidRequest(format!("unknown measure type: {code}")))
    }
}

impl FromStr for MeasureType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let code: i64 = s
            .trim()
            .parse()
            .map_err(|_| Error::InvalidRequest(format!("unknown measure type: {s}")))?;
        Self::try_from(code)
    }
}

impl fmt::Display for MeasureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Real measurements or user objectives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MeasureCategory {
    #[default]
    Real,
    UserObjective,
}

impl MeasureCategory {
    pub const fn code(self) -> i64 {
        match self {
            Self::Real => 1,
            Self::UserObjective => 2,
        }
    }
}

impl TryFrom<i64> for MeasureCategory {
    type Error = Error;

    fn try_from(code: i64) -> Result<Self> {
        match code {
            1 => Ok(Self::Real),
            2 => Ok(Self::UserObjective),
            other => Err(Error::InvalidRequest(format!("unknown measure category: {other}"))),
        }
    }
}

impl fmt::Display for MeasureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

field_enum! {
    /// Daily aggregated activity metric.
    ActivityField, "activity field" {
        Steps => "steps",
        /// Meters.
        Distance => "distance",
        /// Floors climbed.
        Elevation => "elevation",
        /// Seconds of soft activity.
        Soft => "soft",
        /// Seconds of moderate activity.
        Moderate => "moderate",
        /// Seconds of intense activity.
        Intense => "intense",
        /// Moderate plus intense seconds.
        Active => "active",
        /// Active kcal.
        Calories => "calories",
        /// Total kcal.
        TotalCalories => "totalcalories",
        HrAverage => "hr_average",
        HrMin => "hr_min",
        HrMax => "hr_max",
        HrZone0 => "hr_zone_0",
        HrZone1 => "hr_zone_1",
        HrZone2 => "hr_zone_2",
        HrZone3 => "hr_zone_3",
    }
}

field_enum! {
    /// High resolution activity metric.
    IntradayActivityField, "intraday activity field" {
        Steps => "steps",
        Elevation => "elevation",
        Calories => "calories",
        Distance => "distance",
        Stroke => "stroke",
        PoolLap => "pool_lap",
        Duration => "duration",
        HeartRate => "heart_rate",
        SpO2Auto => "spo2_auto",
    }
}

field_enum! {
    /// Workout session metric.
    WorkoutField, "workout field" {
        Calories => "calories",
        Intensity => "intensity",
        ManualDistance => "manual_distance",
        ManualCalories => "manual_calories",
        HrAverage => "hr_average",
        HrMin => "hr_min",
        HrMax => "hr_max",
        HrZone0 => "hr_zone_0",
        HrZone1 => "hr_zone_1",
        HrZone2 => "hr_zone_2",
        HrZone3 => "hr_zone_3",
        PauseDuration => "pause_duration",
        AlgoPauseDuration => "algo_pause_duration",
        Spo2Average => "spo2_average",
        Steps => "steps",
        Distance => "distance",
        Elevation => "elevation",
        PoolLaps => "pool_laps",
        Strokes => "strokes",
        PoolLength => "pool_length",
    }
}

/// Date based filter. The API accepts either a range or a last-update
/// timestamp, never both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DateFilter {
    #[default]
    None,
    /// Data between `start` and `end`. Day based calls use the UTC date.
    Range {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    /// Data modified since the given instant.
    LastUpdate(DateTime<Utc>),
}

/// Filters and pagination shared by the measure calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MeasureGetOptions {
    pub filter: DateFilter,
    /// Offset from a previous response; `0` starts from the beginning.
    pub offset: i64,
}

impl MeasureGetOptions {
    pub fn range(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            filter: DateFilter::Range { start, end },
            offset: 0,
        }
    }

    pub fn last_update(since: DateTime<Utc>) -> Self {
        Self {
            filter: DateFilter::LastUpdate(since),
            offset: 0,
        }
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }

    fn validate(&self) -> Result<()> {
        if let DateFilter::Range { start, end } = self.filter {
            if start > end {
                return Err(Error::InvalidRequest(
                    "date range start is after its end".into(),
                ));
            }
        }
        if self.offset < 0 {
            return Err(Error::InvalidRequest("offset must not be negative".into()));
        }
        Ok(())
    }

    fn apply_offset(&self, form: &mut Form) {
        if self.offset > 0 {
            form.insert("offset".into(), self.offset.to_string());
        }
    }
}

fn join<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

fn base_form(action: &str) -> Form {
    let mut form = Form::new();
    form.insert("action".into(), action.into());
    form
}

fn insert_unix_range(form: &mut Form, start: DateTime<Utc>, end: DateTime<Utc>) {
    form.insert("startdate".into(), start.timestamp().to_string());
    form.insert("enddate".into(), end.timestamp().to_string());
}

fn insert_ymd_filter(form: &mut Form, filter: &DateFilter) {
    match *filter {
        DateFilter::LastUpdate(since) => {
            form.insert("lastupdate".into(), since.timestamp().to_string());
        }
        DateFilter::Range { start, end } => {
            form.insert("startdateymd".into(), start.format("%Y-%m-%d").to_string());
            form.insert("enddateymd".into(), end.format("%Y-%m-%d").to_string());
        }
        DateFilter::None => {}
    }
}

pub(crate) fn getmeas_form(
    types: &[MeasureType],
    category: MeasureCategory,
    opts: &MeasureGetOptions,
) -> Result<Form> {
    opts.validate()?;
    let mut form = base_form("getmeas");
    form.insert("category".into(), category.to_string());

    match types {
        [] => return Err(Error::InvalidRequest("need at least one measure type".into())),
        [single] => {
            form.insert("meastype".into(), single.to_string());
        }
        many => {
            form.insert("meastypes".into(), join(many));
        }
    }

    match opts.filter {
        DateFilter::LastUpdate(since) => {
            form.insert("lastupdate".into(), since.timestamp().to_string());
        }
        DateFilter::Range { start, end } => insert_unix_range(&mut form, start, end),
        DateFilter::None => {}
    }
    opts.apply_offset(&mut form);
    Ok(form)
}

pub(crate) fn getactivity_form(fields: &[ActivityField], opts: &MeasureGetOptions) -> Result<Form> {
    opts.validate()?;
    if fields.is_empty() {
        return Err(Error::InvalidRequest("need at least one activity data field".into()));
    }
    let mut form = base_form("getactivity");
    form.insert("data_fields".into(), join(fields));
    insert_ymd_filter(&mut form, &opts.filter);
    opts.apply_offset(&mut form);
    Ok(form)
}

pub(crate) fn getintradayactivity_form(
    fields: &[IntradayActivityField],
    opts: &MeasureGetOptions,
) -> Result<Form> {
    opts.validate()?;
    if fields.is_empty() {
        return Err(Error::InvalidRequest(
            "need at least one intraday activity data field".into(),
        ));
    }
    let mut form = base_form("getintradayactivity");
    form.insert("data_fields".into(), join(fields));
    if let DateFilter::Range { start, end } = opts.filter {
        insert_unix_range(&mut form, start, end);
    }
    Ok(form)
}

pub(crate) fn getworkouts_form(fields: &[WorkoutField], opts: &MeasureGetOptions) -> Result<Form> {
    opts.validate()?;
    if fields.is_empty() {
        return Err(Error::InvalidRequest("need at least one workout data field".into()));
    }
    let mut form = base_form("getworkouts");
    form.insert("data_fields".into(), join(fields));
    insert_ymd_filter(&mut form, &opts.filter);
    opts.apply_offset(&mut form);
    Ok(form)
}

// =============================================================================
// Response types
// =============================================================================

/// `getmeas` result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Measures {
    #[serde(rename = "updatetime")]
    pub update_time: i64,
    pub timezone: Option<String>,
    #[serde(rename = "measuregrps")]
    pub measure_groups: Vec<MeasureGroup>,
}

/// Measures taken together (e.g. one weigh-in).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeasureGroup {
    #[serde(rename = "grpid")]
    pub group_id: i64,
    pub attrib: i64,
    pub date: i64,
    #[serde(rename = "created")]
    pub created_at: i64,
    pub category: i64,
    #[serde(rename = "deviceid")]
    pub device_id: Option<String>,
    pub measures: Vec<Measure>,
    pub comment: Option<String>,
}

impl MeasureGroup {
    /// Category as an enum; `None` for codes this crate does not know.
    pub fn category(&self) -> Option<MeasureCategory> {
        MeasureCategory::try_from(self.category).ok()
    }

    /// Measures of the given type.
    pub fn measures_of(&self, measure_type: MeasureType) -> impl Iterator<Item = &Measure> {
        self.measures
            .iter()
            .filter(move |m| m.measure_type == measure_type.code())
    }
}

/// A single data point: `value * 10^unit`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Measure {
    pub value: i64,
    #[serde(rename = "type")]
    pub measure_type: i64,
    pub unit: i64,
    pub algo: Option<i64>,
    pub fm: Option<i64>,
    pub fw: Option<i64>,
}

impl Measure {
    pub fn kind(&self) -> Option<MeasureType> {
        MeasureType::try_from(self.measure_type).ok()
    }

    /// The value in the unit of its measure type, or NaN when `unit` is
    /// out of range.
    pub fn real_value(&self) -> f64 {
        i32::try_from(self.unit).map_or(f64::NAN, |unit| self.value as f64 * 10f64.powi(unit))
    }
}

/// `getactivity` result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Activities {
    pub activities: Vec<Activity>,
}

/// One day of aggregated activity. Data fields are present only when
/// requested.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Activity {
    pub date: String,
    pub timezone: Option<String>,
    #[serde(rename = "deviceid")]
    pub device_id: Option<String>,
    pub brand: i64,
    pub is_tracker: bool,

    pub steps: Option<i64>,
    pub distance: Option<f64>,
    pub elevation: Option<f64>,
    pub soft: Option<i64>,
    pub moderate: Option<i64>,
    pub intense: Option<i64>,
    pub active: Option<i64>,
    pub calories: Option<f64>,
    #[serde(rename = "totalcalories")]
    pub total_calories: Option<f64>,
    pub hr_average: Option<i64>,
    pub hr_min: Option<i64>,
    pub hr_max: Option<i64>,
    pub hr_zone_0: Option<i64>,
    pub hr_zone_1: Option<i64>,
    pub hr_zone_2: Option<i64>,
    pub hr_zone_3: Option<i64>,
}

/// `getintradayactivity` result, keyed by unix timestamp.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntradayActivities {
    pub series: HashMap<String, IntradayActivity>,
}

impl IntradayActivities {
    /// Samples sorted by timestamp. Keys that are not timestamps are skipped.
    pub fn samples(&self) -> Vec<(i64, &IntradayActivity)> {
        let mut samples: Vec<_> = self
            .series
            .iter()
            .filter_map(|(ts, sample)| ts.parse::<i64>().ok().map(|ts| (ts, sample)))
            .collect();
        samples.sort_by_key(|(ts, _)| *ts);
        samples
    }
}

/// One intraday sample.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntradayActivity {
    #[serde(rename = "deviceid")]
    pub device_id: Option<String>,
    pub model: Option<String>,
    pub model_id: Option<i64>,

    pub steps: Option<i64>,
    pub elevation: Option<f64>,
    pub calories: Option<f64>,
    pub distance: Option<f64>,
    pub stroke: Option<i64>,
    pub pool_lap: Option<i64>,
    pub duration: Option<i64>,
    pub heart_rate: Option<i64>,
    #[serde(rename = "spo2_auto")]
    pub spo2: Option<f64>,
}

/// `getworkouts` result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Workouts {
    pub series: Vec<Workout>,
}

/// One workout session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Workout {
    pub category: i64,
    pub timezone: Option<String>,
    pub model: Option<i64>,
    pub attrib: i64,
    #[serde(rename = "startdate")]
    pub start_date: i64,
    #[serde(rename = "enddate")]
    pub end_date: i64,
    pub date: String,
    #[serde(rename = "deviceid")]
    pub device_id: Option<String>,
    pub modified: i64,
    pub data: WorkoutData,
}

/// Workout metrics, present only when requested.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkoutData {
    pub calories: Option<f64>,
    pub intensity: Option<i64>,
    pub manual_distance: Option<f64>,
    pub manual_calories: Option<f64>,
    pub hr_average: Option<i64>,
    pub hr_min: Option<i64>,
    pub hr_max: Option<i64>,
    pub hr_zone_0: Option<i64>,
    pub hr_zone_1: Option<i64>,
    pub hr_zone_2: Option<i64>,
    pub hr_zone_3: Option<i64>,
    pub pause_duration: Option<i64>,
    pub algo_pause_duration: Option<i64>,
    pub spo2_average: Option<f64>,
    pub steps: Option<i64>,
    pub distance: Option<f64>,
    pub elevation: Option<f64>,
    pub pool_laps: Option<i64>,
    pub strokes: Option<i64>,
    pub pool_length: Option<i64>,
}

// =============================================================================
// Service
// =============================================================================

/// Measure endpoints.
#[derive(Debug, Clone)]
pub struct MeasureService {
    transport: Arc<Transport>,
}

impl MeasureService {
    pub(crate) fn new(transport: Arc<Transport>) -> Self {
        Self { transport }
    }

    async fn post<T>(&self, ctx: &CallContext, path: &str, form: &Form) -> Result<(T, Response)>
    where
        T: serde::de::DeserializeOwned + Default,
    {
        let (payload, response): (Enveloped<T>, Response) =
            self.transport.post_form(ctx, path, form).await?;
        Ok((payload.body, response))
    }

    /// Measures of the given types (`action=getmeas`).
    #[instrument(skip(self, ctx, opts))]
    pub async fn getmeas(
        &self,
        ctx: &CallContext,
        types: &[MeasureType],
        category: MeasureCategory,
        opts: &MeasureGetOptions,
    ) -> Result<(Measures, Response)> {
        let form = getmeas_form(types, category, opts)?;
        self.post(ctx, MEASURE_PATH, &form).await
    }

    /// Daily aggregated activity (`action=getactivity`).
    #[instrument(skip(self, ctx, opts))]
    pub async fn getactivity(
        &self,
        ctx: &CallContext,
        fields: &[ActivityField],
        opts: &MeasureGetOptions,
    ) -> Result<(Activities, Response)> {
        let form = getactivity_form(fields, opts)?;
        self.post(ctx, MEASURE_V2_PATH, &form).await
    }

    /// High resolution activity (`action=getintradayactivity`).
    ///
    /// Only a date range applies; the call has no pagination.
    #[instrument(skip(self, ctx, opts))]
    pub async fn getintradayactivity(
        &self,
        ctx: &CallContext,
        fields: &[IntradayActivityField],
        opts: &MeasureGetOptions,
    ) -> Result<(IntradayActivities, Response)> {
        let form = getintradayactivity_form(fields, opts)?;
        self.post(ctx, MEASURE_V2_PATH, &form).await
    }

    /// Workout sessions (`action=getworkouts`).
    #[instrument(skip(self, ctx, opts))]
    pub async fn getworkouts(
        &self,
        ctx: &CallContext,
        fields: &[WorkoutField],
        opts: &MeasureGetOptions,
    ) -> Result<(Workouts, Response)> {
        let form = getworkouts_form(fields, opts)?;
        self.post(ctx, MEASURE_V2_PATH, &form).await
    }
}
