//! Entity types of the sample deployment

use crate::impl_auditable_entity;

impl_auditable_entity!(
    /// A unit of work submitted by a consumer
    Job,
    "job",
    "jobs",
    {
        name: Option<String>,
        is_result_fetched: Option<bool>,
        is_finished: Option<bool>,
        is_processing: Option<bool>,
        /// Internal note, neither accepted from nor returned to callers
        #[serde(skip)]
        status_comment: Option<String>,
    }
);

impl_auditable_entity!(
    /// Output produced for a job
    JobResult,
    "job_result",
    "job_results",
    {
        #[validate(required, range(min = 1))]
        job_id: Option<i64>,
        /// Base64 payload
        blob: Option<String>,
        data_origin_format: Option<String>,
        data_encoding: Option<String>,
    },
    joins [job_id]
);

impl_auditable_entity!(
    HyperParameter,
    "hyper_parameter",
    "hyper_parameters",
    {
        #[serde(rename = "type")]
        kind: Option<String>,
        name: Option<String>,
        value: Option<String>,
    }
);

impl_auditable_entity!(
    /// Assignment of a hyper parameter to a job
    HyperParameterForJob,
    "hyper_parameter_for_job",
    "hyper_parameter_for_jobs",
    {
        job_id: Option<i64>,
        hyper_parameter_id: Option<i64>,
    },
    joins [job_id, hyper_parameter_id]
);

impl_auditable_entity!(
    /// A value a job run should use instead of the stored one
    ValueOverride,
    "value_override",
    "values_to_overwrite",
    {
        job_id: Option<i64>,
        context: Option<String>,
        table_name: Option<String>,
        entity_id: Option<String>,
        attribute_name: Option<String>,
        value: Option<String>,
    },
    joins [job_id]
);
