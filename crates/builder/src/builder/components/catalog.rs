//! Built-in component catalog.
//!
//! Module paths carry a version placeholder that the registry substitutes at
//! lookup time:
//! - `__VERSION__` - the requested collector version (`v0.122.0`)
//! - `__PROVIDER_VERSION__` - the matching confmap provider version (`v1.28.0`)
//! - `__VENDOR_VERSION__` - the vendor bundle version

use super::{Category, Namespace};
use crate::builder::versions::Version;

pub const VERSION_PLACEHOLDER: &str = "__VERSION__";
pub const PROVIDER_VERSION_PLACEHOLDER: &str = "__PROVIDER_VERSION__";
pub const VENDOR_VERSION_PLACEHOLDER: &str = "__VENDOR_VERSION__";

pub const CORE_PREFIX: &str = "go.opentelemetry.io/collector/";
pub const CONTRIB_PREFIX: &str = "github.com/open-telemetry/opentelemetry-collector-contrib/";
pub const VENDOR_PREFIX: &str = "github.com/observiq/bindplane-otel-collector/";

/// Release of the vendor bundle the built-in catalog points at.
pub const VENDOR_VERSION: Version = Version::new(1, 72, 0);

/// Confmap providers are versioned 1.x; their minor trails the collector's by this much.
pub const PROVIDER_MINOR_OFFSET: u64 = 94;

/// One catalog row.
#[derive(Clone, Copy, Debug)]
pub struct CatalogEntry {
    pub category: Category,
    pub name: &'static str,
    /// Module path relative to the namespace prefix.
    pub module: &'static str,
    pub namespace: Namespace,
    pub since: Version,
}

const fn core(category: Category, name: &'static str, module: &'static str) -> CatalogEntry {
    CatalogEntry {
        category,
        name,
        module,
        namespace: Namespace::Core,
        since: Version::new(0, 86, 0),
    }
}

const fn contrib(category: Category, name: &'static str, module: &'static str) -> CatalogEntry {
    CatalogEntry {
        category,
        name,
        module,
        namespace: Namespace::Contrib,
        since: Version::new(0, 86, 0),
    }
}

const fn vendor(category: Category, name: &'static str, module: &'static str) -> CatalogEntry {
    CatalogEntry {
        category,
        name,
        module,
        namespace: Namespace::Vendor,
        since: Version::new(0, 86, 0),
    }
}

const fn since(mut entry: CatalogEntry, minor: u64) -> CatalogEntry {
    entry.since = Version::new(0, minor, 0);
    entry
}

use Category::{Connector, Exporter, Extension, Processor, Provider, Receiver};

/// All built-in components.
pub static CATALOG: &[CatalogEntry] = &[
    // Extensions
    core(Extension, "zpages", "extension/zpagesextension"),
    since(core(Extension, "memory_limiter", "extension/memorylimiterextension"), 96),
    contrib(Extension, "health_check", "extension/healthcheckextension"),
    contrib(Extension, "pprof", "extension/pprofextension"),
    contrib(Extension, "basicauth", "extension/basicauthextension"),
    contrib(Extension, "bearertokenauth", "extension/bearertokenauthextension"),
    contrib(Extension, "oauth2client", "extension/oauth2clientauthextension"),
    contrib(Extension, "headers_setter", "extension/headerssetterextension"),
    contrib(Extension, "file_storage", "extension/storage/filestorage"),
    since(contrib(Extension, "opamp", "extension/opampextension"), 91),
    vendor(Extension, "bindplane", "extension/bindplaneextension"),
    // Receivers
    core(Receiver, "otlp", "receiver/otlpreceiver"),
    core(Receiver, "nop", "receiver/nopreceiver"),
    contrib(Receiver, "hostmetrics", "receiver/hostmetricsreceiver"),
    contrib(Receiver, "filelog", "receiver/filelogreceiver"),
    contrib(Receiver, "prometheus", "receiver/prometheusreceiver"),
    contrib(Receiver, "jaeger", "receiver/jaegerreceiver"),
    contrib(Receiver, "zipkin", "receiver/zipkinreceiver"),
    contrib(Receiver, "kafka", "receiver/kafkareceiver"),
    contrib(Receiver, "syslog", "receiver/syslogreceiver"),
    contrib(Receiver, "journald", "receiver/journaldreceiver"),
    contrib(Receiver, "k8s_cluster", "receiver/k8sclusterreceiver"),
    contrib(Receiver, "kubeletstats", "receiver/kubeletstatsreceiver"),
    contrib(Receiver, "docker_stats", "receiver/dockerstatsreceiver"),
    contrib(Receiver, "redis", "receiver/redisreceiver"),
    contrib(Receiver, "postgresql", "receiver/postgresqlreceiver"),
    contrib(Receiver, "mysql", "receiver/mysqlreceiver"),
    contrib(Receiver, "sqlquery", "receiver/sqlqueryreceiver"),
    contrib(Receiver, "windowseventlog", "receiver/windowseventlogreceiver"),
    contrib(Receiver, "otlpjsonfile", "receiver/otlpjsonfilereceiver"),
    vendor(Receiver, "plugin", "receiver/pluginreceiver"),
    vendor(Receiver, "route", "receiver/routereceiver"),
    vendor(Receiver, "m365", "receiver/m365receiver"),
    vendor(Receiver, "sapnetweaver", "receiver/sapnetweaverreceiver"),
    // Processors
    core(Processor, "batch", "processor/batchprocessor"),
    core(Processor, "memory_limiter", "processor/memorylimiterprocessor"),
    contrib(Processor, "attributes", "processor/attributesprocessor"),
    contrib(Processor, "resource", "processor/resourceprocessor"),
    contrib(Processor, "resourcedetection", "processor/resourcedetectionprocessor"),
    contrib(Processor, "filter", "processor/filterprocessor"),
    contrib(Processor, "transform", "processor/transformprocessor"),
    contrib(Processor, "k8sattributes", "processor/k8sattributesprocessor"),
    contrib(Processor, "tail_sampling", "processor/tailsamplingprocessor"),
    contrib(Processor, "probabilistic_sampler", "processor/probabilisticsamplerprocessor"),
    contrib(Processor, "groupbyattrs", "processor/groupbyattrsprocessor"),
    contrib(Processor, "metricstransform", "processor/metricstransformprocessor"),
    contrib(Processor, "cumulativetodelta", "processor/cumulativetodeltaprocessor"),
    contrib(Processor, "deltatorate", "processor/deltatorateprocessor"),
    vendor(Processor, "snapshot", "processor/snapshotprocessor"),
    vendor(Processor, "throughputmeasurement", "processor/throughputmeasurementprocessor"),
    vendor(Processor, "sampling", "processor/samplingprocessor"),
    vendor(Processor, "logcount", "processor/logcountprocessor"),
    vendor(Processor, "metricextract", "processor/metricextractprocessor"),
    // Exporters
    core(Exporter, "otlp", "exporter/otlpexporter"),
    core(Exporter, "otlphttp", "exporter/otlphttpexporter"),
    core(Exporter, "debug", "exporter/debugexporter"),
    core(Exporter, "nop", "exporter/nopexporter"),
    contrib(Exporter, "file", "exporter/fileexporter"),
    contrib(Exporter, "prometheus", "exporter/prometheusexporter"),
    contrib(Exporter, "prometheusremotewrite", "exporter/prometheusremotewriteexporter"),
    contrib(Exporter, "kafka", "exporter/kafkaexporter"),
    contrib(Exporter, "elasticsearch", "exporter/elasticsearchexporter"),
    contrib(Exporter, "awss3", "exporter/awss3exporter"),
    contrib(Exporter, "googlecloud", "exporter/googlecloudexporter"),
    contrib(Exporter, "splunk_hec", "exporter/splunkhecexporter"),
    contrib(Exporter, "zipkin", "exporter/zipkinexporter"),
    contrib(Exporter, "clickhouse", "exporter/clickhouseexporter"),
    contrib(Exporter, "loadbalancing", "exporter/loadbalancingexporter"),
    vendor(Exporter, "chronicle", "exporter/chronicleexporter"),
    vendor(Exporter, "snowflake", "exporter/snowflakeexporter"),
    vendor(Exporter, "azureblob", "exporter/azureblobexporter"),
    // Connectors
    core(Connector, "forward", "connector/forwardconnector"),
    contrib(Connector, "spanmetrics", "connector/spanmetricsconnector"),
    contrib(Connector, "count", "connector/countconnector"),
    contrib(Connector, "routing", "connector/routingconnector"),
    contrib(Connector, "servicegraph", "connector/servicegraphconnector"),
    since(contrib(Connector, "exceptions", "connector/exceptionsconnector"), 97),
    // Providers
    core(Provider, "env", "confmap/provider/envprovider"),
    core(Provider, "file", "confmap/provider/fileprovider"),
    core(Provider, "http", "confmap/provider/httpprovider"),
    core(Provider, "https", "confmap/provider/httpsprovider"),
    core(Provider, "yaml", "confmap/provider/yamlprovider"),
];

/// Confmap providers included in every manifest.
pub const DEFAULT_PROVIDERS: &[&str] = &["env", "file", "http", "https", "yaml"];

/// Vendor components included unless the vendor bundle is suppressed.
pub const VENDOR_BUNDLE: &[(Category, &str)] = &[
    (Extension, "bindplane"),
    (Receiver, "plugin"),
    (Receiver, "route"),
    (Processor, "snapshot"),
    (Processor, "throughputmeasurement"),
    (Processor, "sampling"),
    (Processor, "logcount"),
    (Processor, "metricextract"),
];

/// Replace directives every distribution needs: (old, new).
pub const DEFAULT_REPLACES: &[(&str, &str)] = &[
    // google/gnostic#262
    (
        "github.com/googleapis/gnostic v0.5.6",
        "github.com/googleapis/gnostic v0.5.5",
    ),
    (
        "github.com/docker/go-connections v0.4.1-0.20210727194412-58542c764a11",
        "github.com/docker/go-connections v0.4.0",
    ),
    // mattn/go-ieproxy#45
    (
        "github.com/mattn/go-ieproxy",
        "github.com/mattn/go-ieproxy v0.0.1",
    ),
    // openshift/api#1515
    (
        "github.com/openshift/api",
        "github.com/openshift/api v0.0.0-20230726162818-81f778f3b3ec",
    ),
];

/// Extra replace directives carried by the vendor bundle.
pub const VENDOR_REPLACES: &[(&str, &str)] = &[
    (
        "github.com/observiq/bindplane-otel-collector/internal/version",
        "github.com/observiq/bindplane-otel-collector/internal/version __VENDOR_VERSION__",
    ),
    (
        "github.com/observiq/bindplane-otel-collector/packagestate",
        "github.com/observiq/bindplane-otel-collector/packagestate __VENDOR_VERSION__",
    ),
];

impl CatalogEntry {
    /// Full gomod template (`<prefix><module> <placeholder>`).
    pub fn gomod_template(&self) -> String {
        let (prefix, placeholder) = match (self.namespace, self.category) {
            (Namespace::Core, Provider) => (CORE_PREFIX, PROVIDER_VERSION_PLACEHOLDER),
            (Namespace::Core, _) => (CORE_PREFIX, VERSION_PLACEHOLDER),
            (Namespace::Contrib, _) => (CONTRIB_PREFIX, VERSION_PLACEHOLDER),
            (Namespace::Vendor, _) => (VENDOR_PREFIX, VENDOR_VERSION_PLACEHOLDER),
        };
        format!("{prefix}{} {placeholder}", self.module)
    }
}

/// Confmap provider version for a collector version: `0.M.x` maps to `1.(M-94).0`,
/// never below `1.0.0`.
pub fn provider_version(collector: &Version) -> Version {
    let minor = collector.minor.saturating_sub(PROVIDER_MINOR_OFFSET);
    Version::new(1, minor, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_catalog_has_no_duplicate_rows() {
        let mut seen = HashSet::new();
        for e in CATALOG {
            assert!(
                seen.insert((e.category, e.name, e.namespace)),
                "duplicate catalog row {} {}",
                e.category,
                e.name
            );
        }
    }

    #[test]
    fn test_defaults_are_in_catalog() {
        for name in DEFAULT_PROVIDERS {
            assert!(CATALOG
                .iter()
                .any(|e| e.category == Provider && e.name == *name));
        }
        for (category, name) in VENDOR_BUNDLE {
            assert!(CATALOG.iter().any(|e| e.category == *category
                && e.name == *name
                && e.namespace == Namespace::Vendor));
        }
    }

    #[test]
    fn test_provider_version() {
        assert_eq!(provider_version(&Version::new(0, 122, 0)), Version::new(1, 28, 0));
        assert_eq!(provider_version(&Version::new(0, 90, 0)), Version::new(1, 0, 0));
    }
}
