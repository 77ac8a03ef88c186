use serde_json::{json, Value};

use crate::llm::ToolDefinition;

fn tool(name: &str, description: &str, parameters: Value) -> ToolDefinition {
    ToolDefinition { name: name.to_string(), description: description.to_string(), parameters }
}

fn object(properties: Value, required: &[&str]) -> Value {
    json!({"type": "object", "properties": properties, "required": required})
}

/// The fixed tool set offered to the model on every turn.
pub fn tool_catalog() -> Vec<ToolDefinition> {
    vec![
        tool(
            "register_user",
            "Registers a new customer. Call only once you have both the email and the password.",
            object(
                json!({
                    "email": {"type": "string"},
                    "password": {"type": "string"},
                    "firstName": {"type": "string", "description": "Optional"},
                    "lastName": {"type": "string", "description": "Optional"}
                }),
                &["email", "password"],
            ),
        ),
        tool(
            "login_user",
            "Signs a customer in. Call only once you have both the email and the password.",
            object(
                json!({"email": {"type": "string"}, "password": {"type": "string"}}),
                &["email", "password"],
            ),
        ),
        tool(
            "get_profile",
            "Returns the profile of the signed-in customer.",
            object(json!({}), &[]),
        ),
        tool("logout_user", "Signs the customer out.", object(json!({}), &[])),
        tool(
            "search_shops",
            "Searches shops by name, city, type or category. Call without any parameter to list every shop.",
            object(
                json!({
                    "name": {"type": "string", "description": "Shop name"},
                    "city": {"type": "string", "description": "City"},
                    "type": {"type": "string", "description": "online, physical or both"},
                    "category": {"type": "string", "description": "Category, e.g. Bakery, Grocery"}
                }),
                &[],
            ),
        ),
        tool(
            "get_open_shops",
            "Lists only the shops that are open right now.",
            object(
                json!({
                    "city": {"type": "string", "description": "Optional city filter"},
                    "category": {"type": "string", "description": "Optional category filter"}
                }),
                &[],
            ),
        ),
        tool(
            "search_products",
            "Searches products by keyword across every shop or inside one shop, e.g. 'bread', 'cheese', 'olive oil'.",
            object(
                json!({
                    "query": {"type": "string", "description": "Product name or keywords"},
                    "shop_id": {"type": "integer", "description": "Optional shop id"},
                    "min_price": {"type": "number", "description": "Optional minimum price"},
                    "max_price": {"type": "number", "description": "Optional maximum price"}
                }),
                &[],
            ),
        ),
        tool(
            "get_products_by_shop",
            "Lists the products of one shop. shop_id must come from search_shops; never invent one.",
            object(
                json!({
                    "shop_id": {"type": "integer", "description": "Shop id"},
                    "category": {"type": "string", "description": "Optional keyword filter"}
                }),
                &["shop_id"],
            ),
        ),
        tool(
            "get_product_price",
            "Returns the final unit price of a product with its shop's promotions applied.",
            object(
                json!({"product_id": {"type": "integer", "description": "Product id"}}),
                &["product_id"],
            ),
        ),
        tool(
            "get_promotions_by_shop",
            "Lists every product currently on promotion in one shop.",
            object(json!({"shop_id": {"type": "integer", "description": "Shop id"}}), &["shop_id"]),
        ),
        tool(
            "search_best_promotions",
            "Finds the best active promotions across all shops, optionally for one product name.",
            object(
                json!({
                    "query": {"type": "string", "description": "Optional product name; omit for every promotion"}
                }),
                &[],
            ),
        ),
        tool(
            "get_cart",
            "Shows the current contents of the customer's carts.",
            object(json!({"user_id": {"type": "string", "description": "Customer id"}}), &["user_id"]),
        ),
        tool(
            "propose_actions",
            "REQUIRED after every product or shop search. Presents clickable actions to the customer \
             without ever executing them; the customer always confirms first. Never add to the cart \
             directly, always go through propose_actions.",
            object(
                json!({
                    "message": {"type": "string", "description": "Short summary of the results for the customer"},
                    "actions": {
                        "type": "array",
                        "items": object(
                            json!({
                                "label": {"type": "string", "description": "Button text, e.g. 'Add to cart'"},
                                "description": {"type": "string", "description": "Detail, e.g. 'Baguette - Boulangerie du Port - 1.20'"},
                                "action_type": {
                                    "type": "string",
                                    "enum": ["add_to_cart", "view_shop", "get_details", "navigate"]
                                },
                                "product_id": {"type": "integer", "description": "Product id (add_to_cart, get_details)"},
                                "shop_id": {"type": "integer", "description": "Shop id"},
                                "quantity": {"type": "integer", "description": "Quantity, default 1"}
                            }),
                            &["label", "description", "action_type"],
                        )
                    }
                }),
                &["message", "actions"],
            ),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::tool_catalog;
    use crate::guardrails::MUTATING_TOOLS;

    #[test]
    fn catalog_declares_thirteen_uniquely_named_tools() {
        let catalog = tool_catalog();
        let names: BTreeSet<&str> = catalog.iter().map(|tool| tool.name.as_str()).collect();

        assert_eq!(catalog.len(), 13);
        assert_eq!(names.len(), 13);
        assert!(names.contains("propose_actions"));
        assert!(MUTATING_TOOLS.iter().all(|name| !names.contains(name)));
    }

    #[test]
    fn every_schema_is_an_object_with_a_required_list() {
        for tool in tool_catalog() {
            assert_eq!(tool.parameters["type"], "object", "{}", tool.name);
            assert!(tool.parameters["required"].is_array(), "{}", tool.name);
        }
    }
}
