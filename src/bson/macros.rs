/// Builds a [`Document`](crate::bson::Document) from literal pairs.
///
/// ```
/// use loam_db::document;
/// let doc = document! { "name" => "John", "age" => 42 };
/// assert_eq!(doc.get("age").as_i32(), Some(42));
/// ```
#[macro_export]
macro_rules! document {
    () => { $crate::bson::Document::new() };
    { $($key:expr => $value:expr),+ $(,)? } => {{
        let mut doc = $crate::bson::Document::new();
        $(doc.insert($key, $value);)+
        doc
    }};
}

/// Builds an [`Array`](crate::bson::Array) from literal values.
#[macro_export]
macro_rules! array {
    () => { $crate::bson::Array::new() };
    [ $($value:expr),+ $(,)? ] => {{
        let mut array = $crate::bson::Array::new();
        $(array.push($value);)+
        array
    }};
}
