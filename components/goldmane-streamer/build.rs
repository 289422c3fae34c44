// Messages that end up in the JSON output.
const SERIALIZED_MESSAGES: [&str; 4] = [
    ".goldmane.Flow",
    ".goldmane.FlowKey",
    ".goldmane.PolicyTrace",
    ".goldmane.PolicyHit",
];

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=../../proto_files/goldmane/api.proto");

    let mut builder = tonic_prost_build::configure()
        .build_client(true)
        // The server stub only backs the in-process test server.
        .build_server(true)
        .type_attribute(
            ".goldmane",
            "#[derive(serde::Serialize, serde::Deserialize)]",
        );

    // Zero values are omitted, so absent fields must decode to their default.
    for message in SERIALIZED_MESSAGES {
        builder = builder
            .type_attribute(message, "#[serde(default)]")
            .field_attribute(
                message,
                "#[serde(skip_serializing_if = \"crate::proto::is_default\")]",
            );
    }

    builder
        // Keep the wire name of the flow key in the JSON output.
        .field_attribute(".goldmane.Flow.Key", "#[serde(rename = \"Key\")]")
        .compile_protos(
            &["../../proto_files/goldmane/api.proto"],
            &["../../proto_files"],
        )?;
    Ok(())
}
