use std::{fs::File, io::BufWriter, path::Path};

use arrow::{datatypes::SchemaRef, error::ArrowError, record_batch::RecordBatch};
use parquet::{arrow::ArrowWriter, basic::Compression, file::properties::WriterProperties};

use crate::error::Result;

/// Rows × named columns, held as Arrow record batches sharing one schema.
#[derive(Debug, Clone)]
pub struct Table {
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
}

impl Table {
    pub fn try_new(schema: SchemaRef, batches: Vec<RecordBatch>) -> Result<Self> {
        for (i, batch) in batches.iter().enumerate() {
            if batch.schema() != schema {
                return Err(ArrowError::SchemaError(format!(
                    "batch {i} does not match the table schema"
                ))
                .into());
            }
        }
        Ok(Self { schema, batches })
    }

    pub fn empty(schema: SchemaRef) -> Self {
        Self {
            schema,
            batches: Vec::new(),
        }
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    pub fn batches(&self) -> &[RecordBatch] {
        &self.batches
    }

    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(|b| b.num_rows()).sum()
    }

    pub fn num_columns(&self) -> usize {
        self.schema.fields().len()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.schema.fields().iter().map(|f| f.name().as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows() == 0
    }

    /// Writes every batch to `path` and returns the resulting file size in MB.
    pub fn write_parquet(&self, path: &Path) -> Result<f64> {
        let file = File::create(path)?;
        let buf = BufWriter::new(file);
        let props = WriterProperties::builder()
            .set_compression(Compression::UNCOMPRESSED)
            .build();
        let mut writer = ArrowWriter::try_new(buf, self.schema.clone(), Some(props))?;
        for batch in &self.batches {
            writer.write(batch)?;
        }
        writer.close()?;

        let file_size_mb = std::fs::metadata(path)
            .map(|m| m.len() as f64 / (1024.0 * 1024.0))
            .unwrap_or(0.0);
        Ok(file_size_mb)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::{
        array::{ArrayRef, Float64Array, Int64Array, StringArray},
        datatypes::{DataType, Field, Schema},
    };
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

    use super::*;
    use crate::error::ExtractError;

    fn orders_schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("customer", DataType::Utf8, true),
            Field::new("total", DataType::Float64, true),
        ]))
    }

    fn orders_batch(schema: &SchemaRef, ids: &[i64]) -> RecordBatch {
        let customers: Vec<Option<&str>> = ids.iter().map(|i| (i % 2 == 0).then_some("acme")).collect();
        let totals: Vec<f64> = ids.iter().map(|i| *i as f64 * 1.5).collect();
        let columns: Vec<ArrayRef> = vec![
            Arc::new(Int64Array::from(ids.to_vec())),
            Arc::new(StringArray::from(customers)),
            Arc::new(Float64Array::from(totals)),
        ];
        RecordBatch::try_new(schema.clone(), columns).unwrap()
    }

    #[test]
    fn counts_rows_across_batches() {
        let schema = orders_schema();
        let table = Table::try_new(
            schema.clone(),
            vec![orders_batch(&schema, &[1, 2, 3]), orders_batch(&schema, &[4, 5])],
        )
        .unwrap();
        assert_eq!(table.num_rows(), 5);
        assert_eq!(table.num_columns(), 3);
        assert_eq!(table.column_names(), vec!["id", "customer", "total"]);
        assert!(!table.is_empty());
        assert!(Table::empty(schema).is_empty());
    }

    #[test]
    fn rejects_batches_with_a_foreign_schema() {
        let schema = orders_schema();
        let other = Arc::new(Schema::new(vec![Field::new("id", DataType::Int64, false)]));
        let stray = RecordBatch::try_new(other, vec![Arc::new(Int64Array::from(vec![1])) as ArrayRef]).unwrap();
        let err = Table::try_new(schema, vec![stray]).unwrap_err();
        assert!(matches!(err, ExtractError::Arrow(_)));
    }

    #[test]
    fn parquet_output_keeps_every_row() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("orders.parquet");
        let schema = orders_schema();
        let table = Table::try_new(
            schema.clone(),
            vec![orders_batch(&schema, &[1, 2]), orders_batch(&schema, &[3])],
        )
        .unwrap();

        let size_mb = table.write_parquet(&path).unwrap();
        assert!(size_mb > 0.0);

        let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(&path).unwrap())
            .unwrap()
            .build()
            .unwrap();
        let rows: usize = reader.map(|b| b.unwrap().num_rows()).sum();
        assert_eq!(rows, 3);
    }
}
