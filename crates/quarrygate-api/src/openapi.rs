//! Synthesizes the OpenAPI document describing the mechanical CRUD
//! surface from loaded collection descriptors, built from the schema
//! registry rather than hand-written. Hosting a Swagger UI to browse
//! this document is left to an external collaborator.

use quarrygate_schema::SchemaRegistry;
use utoipa::openapi::content::ContentBuilder;
use utoipa::openapi::path::{HttpMethod, OperationBuilder, ParameterBuilder, ParameterIn};
use utoipa::openapi::request_body::RequestBodyBuilder;
use utoipa::openapi::response::ResponseBuilder;
use utoipa::openapi::schema::{ObjectBuilder, Type as SchemaType};
use utoipa::openapi::{InfoBuilder, OpenApi, OpenApiBuilder, Required};

pub fn build(registry: &SchemaRegistry) -> OpenApi {
    let info = InfoBuilder::new()
        .title("Quarrygate Gateway")
        .version("1.0.0")
        .description(Some("Schema-driven REST gateway over MongoDB, synthesized from the loaded collection descriptors."))
        .build();

    let mut openapi = OpenApiBuilder::new().info(info).build();

    let document_schema = ObjectBuilder::new().schema_type(SchemaType::Object).build();
    let ok_response = |description: &str| {
        ResponseBuilder::new()
            .description(description)
            .content("application/json", ContentBuilder::new().schema(Some(document_schema.clone())).build())
            .build()
    };
    let id_param = ParameterBuilder::new()
        .name("id")
        .parameter_in(ParameterIn::Path)
        .required(Required::True)
        .description(Some("Document identifier"))
        .schema(Some(ObjectBuilder::new().schema_type(SchemaType::String).build()))
        .build();

    let mut names: Vec<&str> = registry.collection_names().collect();
    names.sort_unstable();

    for name in names {
        let list_op = OperationBuilder::new()
            .tag(name)
            .operation_id(Some(format!("list_{name}")))
            .summary(Some(format!("List {name}")))
            .response("200", ok_response("A page of matching documents"))
            .build();
        openapi.paths.add_path_operation(format!("/{name}"), vec![HttpMethod::Get], list_op);

        let create_op = OperationBuilder::new()
            .tag(name)
            .operation_id(Some(format!("create_{name}")))
            .summary(Some(format!("Create a {name} document")))
            .request_body(Some(
                RequestBodyBuilder::new()
                    .content("application/json", ContentBuilder::new().schema(Some(document_schema.clone())).build())
                    .build(),
            ))
            .response("201", ok_response("The created document"))
            .build();
        openapi.paths.add_path_operation(format!("/{name}"), vec![HttpMethod::Post], create_op);

        let get_op = OperationBuilder::new()
            .tag(name)
            .operation_id(Some(format!("get_{name}")))
            .summary(Some(format!("Get a {name} document by id")))
            .parameter(id_param.clone())
            .response("200", ok_response("The matching document"))
            .response("404", ok_response("No document with that id"))
            .build();
        openapi.paths.add_path_operation(format!("/{name}/{{id}}"), vec![HttpMethod::Get], get_op);

        let update_op = OperationBuilder::new()
            .tag(name)
            .operation_id(Some(format!("update_{name}")))
            .summary(Some(format!("Update a {name} document by id")))
            .parameter(id_param.clone())
            .request_body(Some(
                RequestBodyBuilder::new()
                    .content("application/json", ContentBuilder::new().schema(Some(document_schema.clone())).build())
                    .build(),
            ))
            .response("200", ok_response("The updated document"))
            .response("404", ok_response("No document with that id"))
            .build();
        openapi.paths.add_path_operation(format!("/{name}/{{id}}"), vec![HttpMethod::Patch], update_op);

        let delete_op = OperationBuilder::new()
            .tag(name)
            .operation_id(Some(format!("delete_{name}")))
            .summary(Some(format!("Delete a {name} document by id")))
            .parameter(id_param.clone())
            .response("200", ok_response("Deletion result"))
            .response("404", ok_response("No document with that id"))
            .build();
        openapi.paths.add_path_operation(format!("/{name}/{{id}}"), vec![HttpMethod::Delete], delete_op);
    }

    openapi
}
