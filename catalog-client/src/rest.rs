//! Gateway implementation over the Iceberg REST catalog

use async_trait::async_trait;
use iceberg::{
    spec::{
        DataContentType, Literal, Operation, PrimitiveLiteral, TableMetadata, Transform, Type,
    },
    Catalog, NamespaceIdent, TableIdent,
};
use iceberg_catalog_rest::{RestCatalog, RestCatalogConfig};
use serde_json::{json, Value as JsonValue};
use std::collections::{BTreeMap, HashMap};
use tracing::instrument;

use crate::{
    types::{
        date_from_epoch_days, date_from_epoch_months, date_from_epoch_years,
        expand_partition_levels, DataFileInfo, DataFileScan, PartitionTransform, PartitionValue,
        SnapshotInfo, SpecField, TableDescriptor,
    },
    CatalogError, CatalogGateway,
};

pub struct RestCatalogGateway {
    catalog: RestCatalog,
    default_database: String,
}

impl RestCatalogGateway {
    pub fn new(uri: &str, warehouse: Option<&str>, default_database: &str) -> Self {
        let config = match warehouse {
            Some(warehouse) => RestCatalogConfig::builder()
                .uri(uri.to_string())
                .warehouse(warehouse.to_string())
                .build(),
            None => RestCatalogConfig::builder().uri(uri.to_string()).build(),
        };

        Self {
            catalog: RestCatalog::new(config),
            default_database: default_database.to_string(),
        }
    }

    /// Dotted names are already qualified; everything else resolves against
    /// the default database.
    fn resolve_table_ident(&self, logical_name: &str) -> TableIdent {
        let parts: Vec<&str> = logical_name.split('.').collect();
        if let Some((name, namespace @ [_, ..])) = parts.split_last() {
            let namespace = NamespaceIdent::from_vec(
                namespace.iter().map(|s| s.to_string()).collect(),
            )
            .unwrap_or_else(|_| NamespaceIdent::new(self.default_database.clone()));
            return TableIdent::new(namespace, name.to_string());
        }

        TableIdent::new(
            NamespaceIdent::new(self.default_database.clone()),
            logical_name.to_string(),
        )
    }

    async fn load_table(&self, logical_name: &str) -> Result<iceberg::table::Table, CatalogError> {
        let ident = self.resolve_table_ident(logical_name);
        match self.catalog.load_table(&ident).await {
            Ok(table) => Ok(table),
            Err(e) => {
                // Not-found is a permanent, user-facing condition; report it
                // distinctly from transport failures.
                match self.catalog.table_exists(&ident).await {
                    Ok(false) => Err(CatalogError::TableNotFound(logical_name.to_string())),
                    _ => Err(CatalogError::Catalog(e)),
                }
            }
        }
    }
}

#[async_trait]
impl CatalogGateway for RestCatalogGateway {
    #[instrument(skip(self), err)]
    async fn list_tables(&self) -> Result<Vec<String>, CatalogError> {
        let namespace = NamespaceIdent::new(self.default_database.clone());
        let idents = self
            .catalog
            .list_tables(&namespace)
            .await
            .map_err(CatalogError::Catalog)?;

        Ok(idents.iter().map(|ident| ident.name().to_string()).collect())
    }

    #[instrument(skip(self), err)]
    async fn describe_table(&self, table: &str) -> Result<TableDescriptor, CatalogError> {
        let loaded = self.load_table(table).await?;
        let metadata = loaded.metadata();

        let schema = metadata.current_schema();
        let columns = schema
            .as_struct()
            .fields()
            .iter()
            .map(|field| common::model::TableColumn {
                name: field.name.clone(),
                column_type: render_type(&field.field_type),
            })
            .collect();

        let spec = extract_spec_fields(metadata)?;

        Ok(TableDescriptor {
            name: table.to_string(),
            columns,
            partitions: expand_partition_levels(&spec),
        })
    }

    #[instrument(skip(self), err)]
    async fn list_snapshots(&self, table: &str) -> Result<Vec<SnapshotInfo>, CatalogError> {
        let loaded = self.load_table(table).await?;
        let metadata = loaded.metadata();

        Ok(metadata
            .snapshots()
            .map(|snapshot| snapshot_info(snapshot))
            .collect())
    }

    #[instrument(skip(self), err)]
    async fn scan_data_files(&self, table: &str) -> Result<DataFileScan, CatalogError> {
        let loaded = self.load_table(table).await?;
        let metadata = loaded.metadata();
        let spec = extract_spec_fields(metadata)?;

        let Some(current) = metadata.current_snapshot() else {
            return Ok(DataFileScan::empty());
        };

        let manifest_list = current
            .load_manifest_list(loaded.file_io(), metadata)
            .await
            .map_err(CatalogError::Catalog)?;

        let mut files = Vec::new();
        for manifest_file in manifest_list.entries() {
            let manifest = manifest_file
                .load_manifest(loaded.file_io())
                .await
                .map_err(CatalogError::Catalog)?;

            for entry in manifest.entries() {
                if !entry.is_alive() {
                    continue;
                }

                let data_file = entry.data_file();
                if data_file.content_type() != DataContentType::Data {
                    continue;
                }

                let mut partition = HashMap::new();
                for (spec_field, value) in spec.iter().zip(data_file.partition().iter()) {
                    let Some(value) = value else {
                        continue;
                    };
                    partition.insert(
                        spec_field.field_id,
                        partition_value(spec_field, value)?,
                    );
                }

                files.push(DataFileInfo {
                    partition,
                    spec_id: manifest_file.partition_spec_id,
                    record_count: data_file.record_count() as i64,
                    file_size_bytes: data_file.file_size_in_bytes() as i64,
                });
            }
        }

        Ok(DataFileScan {
            spec,
            snapshot: Some(snapshot_info(current)),
            files,
        })
    }
}

fn extract_spec_fields(metadata: &TableMetadata) -> Result<Vec<SpecField>, CatalogError> {
    let schema = metadata.current_schema();
    let spec = metadata.default_partition_spec();

    let mut fields = Vec::with_capacity(spec.fields().len());
    for field in spec.fields() {
        let source = schema.field_by_id(field.source_id).ok_or_else(|| {
            CatalogError::MissingSourceField {
                source_id: field.source_id,
                name: field.name.clone(),
            }
        })?;

        let transform = match field.transform {
            Transform::Identity => PartitionTransform::Identity,
            Transform::Day => PartitionTransform::Day,
            Transform::Month => PartitionTransform::Month,
            Transform::Year => PartitionTransform::Year,
            other => return Err(CatalogError::UnknownTransform(other.to_string())),
        };

        fields.push(SpecField {
            field_id: field.field_id,
            source_column: source.name.clone(),
            transform,
        });
    }

    Ok(fields)
}

fn snapshot_info(snapshot: &iceberg::spec::Snapshot) -> SnapshotInfo {
    let summary = snapshot.summary();

    SnapshotInfo {
        snapshot_id: snapshot.snapshot_id(),
        parent_id: snapshot.parent_snapshot_id(),
        timestamp_ms: snapshot.timestamp_ms(),
        operation: operation_name(&summary.operation).to_string(),
        manifest_list: snapshot.manifest_list().to_string(),
        summary: summary
            .additional_properties
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect::<BTreeMap<_, _>>(),
    }
}

#[allow(unreachable_patterns)]
fn operation_name(operation: &Operation) -> &'static str {
    match operation {
        Operation::Append => "append",
        Operation::Replace => "replace",
        Operation::Overwrite => "overwrite",
        Operation::Delete => "delete",
        _ => "unknown",
    }
}

/// Convert a raw partition literal into the gateway value model. Time
/// transforms carry their epoch-relative ordinal; resolve it to a calendar
/// date here so downstream code never sees transform encodings.
fn partition_value(
    spec_field: &SpecField,
    literal: &Literal,
) -> Result<PartitionValue, CatalogError> {
    let invalid = |reason: &str| CatalogError::InvalidPartitionValue {
        field: spec_field.source_column.clone(),
        reason: reason.to_string(),
    };

    match spec_field.transform {
        PartitionTransform::Identity => Ok(PartitionValue::Value(literal_to_json(literal))),
        PartitionTransform::Day => {
            let ordinal = literal_ordinal(literal).ok_or_else(|| invalid("expected a date"))?;
            date_from_epoch_days(ordinal)
                .map(PartitionValue::Date)
                .ok_or_else(|| invalid("date out of range"))
        }
        PartitionTransform::Month => {
            let ordinal = literal_ordinal(literal).ok_or_else(|| invalid("expected a month"))?;
            date_from_epoch_months(ordinal)
                .map(PartitionValue::Date)
                .ok_or_else(|| invalid("month out of range"))
        }
        PartitionTransform::Year => {
            let ordinal = literal_ordinal(literal).ok_or_else(|| invalid("expected a year"))?;
            date_from_epoch_years(ordinal)
                .map(PartitionValue::Date)
                .ok_or_else(|| invalid("year out of range"))
        }
    }
}

fn literal_ordinal(literal: &Literal) -> Option<i32> {
    match literal {
        Literal::Primitive(PrimitiveLiteral::Int(v)) => Some(*v),
        Literal::Primitive(PrimitiveLiteral::Long(v)) => i32::try_from(*v).ok(),
        _ => None,
    }
}

fn literal_to_json(literal: &Literal) -> JsonValue {
    match literal {
        Literal::Primitive(primitive) => match primitive {
            PrimitiveLiteral::Boolean(v) => json!(v),
            PrimitiveLiteral::Int(v) => json!(v),
            PrimitiveLiteral::Long(v) => json!(v),
            PrimitiveLiteral::Float(v) => json!(v.into_inner()),
            PrimitiveLiteral::Double(v) => json!(v.into_inner()),
            PrimitiveLiteral::String(v) => json!(v),
            other => json!(format!("{other:?}")),
        },
        other => json!(format!("{other:?}")),
    }
}

/// Render a column type the way the lakehouse UI displays it: lowercase
/// primitives, `struct<name:type,...>`, `array<type>`, `map<k,v>`.
fn render_type(column_type: &Type) -> String {
    match column_type {
        Type::Primitive(primitive) => primitive.to_string(),
        Type::Struct(inner) => {
            let fields: Vec<String> = inner
                .fields()
                .iter()
                .map(|field| format!("{}:{}", field.name, render_type(&field.field_type)))
                .collect();
            format!("struct<{}>", fields.join(","))
        }
        Type::List(inner) => format!("array<{}>", render_type(&inner.element_field.field_type)),
        Type::Map(inner) => format!(
            "map<{},{}>",
            render_type(&inner.key_field.field_type),
            render_type(&inner.value_field.field_type)
        ),
    }
}
