use toml_edit::{Array, InlineTable, Item, Value};

use comfygit_types::WorkflowNodeWidgetRef;

/// Build the inline table for one node widget reference.
pub(crate) fn ref_to_inline(reference: &WorkflowNodeWidgetRef) -> InlineTable {
    let mut table = InlineTable::new();
    table.insert("node_id", reference.node_id.as_str().into());
    table.insert("node_type", reference.node_type.as_str().into());
    table.insert("widget_index", (reference.widget_index as i64).into());
    table.insert("widget_value", reference.widget_value.as_str().into());
    table
}

pub(crate) fn ref_from_inline(table: &InlineTable) -> Option<WorkflowNodeWidgetRef> {
    Some(WorkflowNodeWidgetRef {
        node_id: table.get("node_id")?.as_str()?.to_string(),
        node_type: table.get("node_type")?.as_str()?.to_string(),
        widget_index: table.get("widget_index")?.as_integer()? as usize,
        widget_value: table.get("widget_value")?.as_str()?.to_string(),
    })
}

pub(crate) fn string_array(values: impl IntoIterator<Item = impl Into<String>>) -> Array {
    let mut array = Array::new();
    for value in values {
        array.push(value.into());
    }
    array
}

pub(crate) fn array_of_strings(item: &Item) -> Vec<String> {
    item.as_array()
        .map(|array| {
            array
                .iter()
                .filter_map(Value::as_str)
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// A multi-line array of inline tables: one element per line, trailing
/// comma, closing bracket on its own line.
pub(crate) fn pretty_entry_array(entries: impl IntoIterator<Item = InlineTable>) -> Array {
    let mut array = Array::new();
    for entry in entries {
        array.push_formatted(Value::InlineTable(entry));
    }
    for value in array.iter_mut() {
        value.decor_mut().set_prefix("\n    ");
        value.decor_mut().set_suffix("");
    }
    array.set_trailing("\n");
    array.set_trailing_comma(true);
    array
}
