//! Translation of upstream embedding responses into the OpenAI list form.

use serde_json::Value;

use crate::messages::openai::{
    EmbeddingError, EmbeddingInput, EmbeddingObject, EmbeddingUsage, EmbeddingsResponse, ObjectType,
};

/// Inputs shorter than this are rejected without an upstream call.
const MIN_INPUT_CHARS: usize = 5;

/// Collects the inputs to embed, or rejects the request when nothing in it
/// is long enough to be meaningful.
pub(crate) fn validate_input(input: &EmbeddingInput) -> Result<Vec<String>, ()> {
    let texts: Vec<String> = match input {
        EmbeddingInput::Single(text) => vec![text.clone()],
        EmbeddingInput::Batch(texts) => texts.clone(),
    };

    if texts.iter().any(|text| text.chars().count() >= MIN_INPUT_CHARS) {
        Ok(texts)
    } else {
        Err(())
    }
}

/// Response for inputs that failed validation: an empty list plus an error
/// object, not an HTTP error.
pub(crate) fn short_input_response(model: &str) -> EmbeddingsResponse {
    empty_response(
        model,
        "Input text is too short to embed; provide at least 5 characters",
    )
}

/// Maps the raw upstream body to OpenAI list form.
///
/// Accepts both the batch shape (`embeddings: [{values}]`) and the single
/// shape (`embedding: {values}`); anything else yields an empty list with a
/// structure-mismatch error.
pub(crate) fn to_embeddings_response(upstream: &Value, model: &str) -> EmbeddingsResponse {
    if let Some(embeddings) = upstream.get("embeddings").and_then(Value::as_array) {
        let data = embeddings
            .iter()
            .filter_map(|entry| entry.get("values").and_then(Value::as_array))
            .enumerate()
            .map(|(index, values)| embedding_object(values, index as u32))
            .collect();

        return list_response(model, data);
    }

    if let Some(values) = upstream
        .get("embedding")
        .and_then(|embedding| embedding.get("values"))
        .and_then(Value::as_array)
    {
        return list_response(model, vec![embedding_object(values, 0)]);
    }

    log::warn!("upstream embedding response has an unexpected shape");
    empty_response(model, "Upstream embedding response had an unexpected structure")
}

fn embedding_object(values: &[Value], index: u32) -> EmbeddingObject {
    EmbeddingObject {
        object: ObjectType::Embedding,
        embedding: values.iter().filter_map(Value::as_f64).map(|v| v as f32).collect(),
        index,
    }
}

fn list_response(model: &str, data: Vec<EmbeddingObject>) -> EmbeddingsResponse {
    EmbeddingsResponse {
        object: ObjectType::List,
        data,
        model: model.to_string(),
        usage: EmbeddingUsage::default(),
        error: None,
    }
}

fn empty_response(model: &str, message: &str) -> EmbeddingsResponse {
    EmbeddingsResponse {
        object: ObjectType::List,
        data: Vec::new(),
        model: model.to_string(),
        usage: EmbeddingUsage::default(),
        error: Some(EmbeddingError {
            message: message.to_string(),
            error_type: "invalid_request_error".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn short_inputs_are_rejected() {
        assert!(validate_input(&EmbeddingInput::Single("hey".to_string())).is_err());
        assert!(validate_input(&EmbeddingInput::Single(String::new())).is_err());
        assert!(validate_input(&EmbeddingInput::Batch(vec!["a".to_string(), "bb".to_string()])).is_err());

        let response = short_input_response("gemini-embedding");
        assert!(response.data.is_empty());
        assert_eq!(response.error.unwrap().error_type, "invalid_request_error");
    }

    #[test]
    fn one_valid_element_admits_the_batch() {
        let input = EmbeddingInput::Batch(vec!["ab".to_string(), "long enough".to_string()]);
        let texts = validate_input(&input).unwrap();
        assert_eq!(texts.len(), 2);
    }

    #[test]
    fn batch_shape_maps_to_indexed_list() {
        let upstream = json!({
            "embeddings": [
                { "values": [0.1, 0.2] },
                { "values": [0.3] }
            ]
        });

        let response = to_embeddings_response(&upstream, "gemini-embedding");

        assert_eq!(response.data.len(), 2);
        assert_eq!(response.data[0].index, 0);
        assert_eq!(response.data[1].index, 1);
        assert_eq!(response.data[1].embedding, vec![0.3_f32]);
        assert!(response.error.is_none());
        assert_eq!(response.usage.prompt_tokens, 0);
        assert_eq!(response.usage.total_tokens, 0);
    }

    #[test]
    fn single_shape_wraps_to_one_entry() {
        let upstream = json!({ "embedding": { "values": [1.0, 2.0, 3.0] } });

        let response = to_embeddings_response(&upstream, "gemini-embedding");

        assert_eq!(response.data.len(), 1);
        assert_eq!(response.data[0].embedding.len(), 3);
    }

    #[test]
    fn structure_mismatch_yields_empty_list_with_error() {
        let upstream = json!({ "unexpected": true });

        let response = to_embeddings_response(&upstream, "gemini-embedding");

        assert!(response.data.is_empty());
        assert!(response.error.is_some());
    }
}
