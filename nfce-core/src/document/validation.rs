use std::path::{Path, PathBuf};

use crate::config::Config;
use libxml::{
    error::StructuredError,
    parser::Parser,
    schemas::{SchemaParserContext, SchemaValidationContext},
};

pub type ValidationResult = Result<(), Vec<String>>;

/// Validates an outbound XML message against a named XSD.
pub trait SchemaValidator: Send + Sync {
    fn validate(&self, xml: &str, schema_file: &str) -> ValidationResult;
}

/// libxml2-backed validator reading XSD files from a directory.
#[derive(Debug, Clone)]
pub struct XsdSchemaValidator {
    schema_dir: PathBuf,
}

impl XsdSchemaValidator {
    pub fn new(schema_dir: impl Into<PathBuf>) -> Self {
        Self {
            schema_dir: schema_dir.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.schema_dir())
    }

    pub fn schema_dir(&self) -> &Path {
        &self.schema_dir
    }

    fn build_validation_context(
        &self,
        schema_file: &str,
    ) -> Result<SchemaValidationContext, Vec<String>> {
        let xsd_path = self.schema_dir.join(schema_file);
        // libxml gives an unhelpful error for a missing schema file
        if !xsd_path.exists() {
            return Err(vec![format!("Schema not found: {}", xsd_path.display())]);
        }
        let xsd_path = xsd_path
            .to_str()
            .ok_or_else(|| vec!["Invalid XSD path".to_string()])?;

        let mut parser_ctx = SchemaParserContext::from_file(xsd_path);
        SchemaValidationContext::from_parser(&mut parser_ctx).map_err(format_validation_errors)
    }
}

fn format_validation_errors(errors: Vec<StructuredError>) -> Vec<String> {
    errors
        .into_iter()
        .map(|se| {
            se.message
                .as_deref()
                .map(str::trim)
                .map(str::to_string)
                .unwrap_or_else(|| format!("{se:?}"))
        })
        .collect()
}

impl SchemaValidator for XsdSchemaValidator {
    fn validate(&self, xml: &str, schema_file: &str) -> ValidationResult {
        let mut validation_ctx = self.build_validation_context(schema_file)?;
        let document = Parser::default()
            .parse_string(xml)
            .map_err(|e| vec![format!("Failed to parse XML: {e:?}")])?;

        validation_ctx
            .validate_document(&document)
            .map_err(format_validation_errors)
    }
}
