#[cfg(feature = "serde")]
mod serde_tests {
    use minihaml::{
        Context, Document, Format, MinihamlEngine, MinihamlError, MinihamlInterface, Options, Value, parse,
    };
    use serde_json;

    #[test]
    fn test_value_serialization() {
        let value: Value = [
            ("name", Value::from("Ann")),
            ("age", Value::from(41)),
            ("score", Value::from(9.5)),
            ("tags", Value::from(vec!["a", "b"])),
            ("manager", Value::Nil),
        ]
        .into_iter()
        .collect();

        let serialized = serde_json::to_string(&value).unwrap();
        assert_eq!(
            serialized,
            r#"{"age":41,"manager":null,"name":"Ann","score":9.5,"tags":["a","b"]}"#
        );

        let deserialized: Value = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized, value);
    }

    #[test]
    fn test_context_from_json() {
        let context: Context =
            serde_json::from_str(r#"{"user":{"name":"Ann","admin":true}}"#).unwrap();

        let mut engine = MinihamlEngine::new();
        engine
            .add_template("user", "- if user.admin\n  %b= user.name")
            .unwrap();
        assert_eq!(engine.render("user", Some(&context)).unwrap(), "<b>Ann</b>\n");
    }

    #[test]
    fn test_options_serialization() {
        let options = Options::default()
            .with_format(Format::Html5)
            .with_indent_size(4);

        let serialized = serde_json::to_string(&options).unwrap();
        let deserialized: Options = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized.format, Format::Html5);
        assert_eq!(deserialized.indent_size, 4);
        assert_eq!(deserialized.auto_closing_tags, options.auto_closing_tags);

        // Missing fields fall back to their defaults.
        let partial: Options = serde_json::from_str(r#"{"format":"html4"}"#).unwrap();
        assert_eq!(partial.format, Format::Html4);
        assert!(partial.encode_html);
        assert_eq!(partial.indent_size, 2);
    }

    #[test]
    fn test_document_serialization() {
        let document = parse("%p.intro Hello #{name}\n@content main\n  %br").unwrap();
        let serialized = serde_json::to_string(&document).unwrap();
        let deserialized: Document = serde_json::from_str(&serialized).unwrap();
        assert_eq!(document, deserialized);
    }

    #[test]
    fn test_error_serialization() {
        let err = parse("%p(a='1'").map_err(MinihamlError::from).unwrap_err();
        let serialized = serde_json::to_string(&err).unwrap();
        let deserialized: MinihamlError = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized, err);
    }

    #[test]
    fn test_engine_serialization() {
        let mut engine = MinihamlEngine::new();

        // Add some templates
        engine
            .add_template("greeting", "%p Hello, #{name}!")
            .unwrap();
        engine
            .add_template("list", "%ul\n  - for item in items\n    %li= item")
            .unwrap();

        // Serialize the engine
        let serialized = serde_json::to_string(&engine).unwrap();

        // Deserialize back to an engine, which recompiles on demand
        let deserialized: MinihamlEngine = serde_json::from_str(&serialized).unwrap();

        let context1 = Context::new().with("name", "World");
        let context2 = Context::new().with("items", vec!["a", "b", "c"]);

        // Both engines should render the same outputs
        assert_eq!(
            engine.render("greeting", Some(&context1)).unwrap(),
            deserialized.render("greeting", Some(&context1)).unwrap()
        );

        assert_eq!(
            engine.render("list", Some(&context2)).unwrap(),
            deserialized.render("list", Some(&context2)).unwrap()
        );
    }
}
