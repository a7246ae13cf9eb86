//! The measurement event handed over by the collectd write callback.

/// One value list dispatched by collectd.
///
/// `values` has a fixed arity per `type_name`: every sample of a given type
/// carries the same number of values, in the order the types database
/// declares its data sources.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    pub host: String,
    pub plugin: String,
    pub plugin_instance: Option<String>,
    pub type_name: String,
    pub type_instance: Option<String>,
    /// Seconds since the epoch, as collectd reports it.
    pub time: f64,
    pub values: Vec<f64>,
}
