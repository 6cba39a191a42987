use crate::domain::flow::{FlowGraph, FlowNode, FlowNodeType};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlowTemplate {
    General,
    Healthcare,
    Ecommerce,
}

impl FlowTemplate {
    pub const ALL: [FlowTemplate; 3] = [Self::General, Self::Healthcare, Self::Ecommerce];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Healthcare => "healthcare",
            Self::Ecommerce => "ecommerce",
        }
    }

    /// Unknown business types get the general template.
    pub fn for_business(business_type: &str) -> Self {
        match business_type.trim().to_ascii_lowercase().as_str() {
            "healthcare" => Self::Healthcare,
            "ecommerce" => Self::Ecommerce,
            _ => Self::General,
        }
    }

    pub fn graph(&self) -> FlowGraph {
        let (welcome, nodes) = match self {
            Self::General => ("Hello! How can I help you today?", general_nodes()),
            Self::Healthcare => {
                ("Hello! I can help with appointments and health questions.", healthcare_nodes())
            }
            Self::Ecommerce => {
                ("Welcome! Let me help you find what you are looking for.", ecommerce_nodes())
            }
        };
        FlowGraph { welcome: Some(welcome.to_string()), nodes }
    }
}

fn contact_form(prompt: &str) -> FlowNode {
    FlowNode::new("contact-form", FlowNodeType::ContactForm, prompt).with_next("end")
}

fn general_nodes() -> Vec<FlowNode> {
    vec![
        FlowNode::new("start", FlowNodeType::MultipleChoice, "What can I assist you with?")
            .with_option("General information", "general-info")
            .with_option("Pricing", "pricing")
            .with_option("Support request", "support")
            .with_option("Contact someone", "contact-form"),
        FlowNode::new(
            "general-info",
            FlowNodeType::OpenEnded,
            "What would you like to know? Ask me anything about us.",
        )
        .with_ai_handling()
        .with_next("contact-form"),
        FlowNode::new(
            "pricing",
            FlowNodeType::Statement,
            "Our pricing depends on the package you choose. We can send a tailored quote.",
        )
        .with_next("contact-form"),
        FlowNode::new(
            "support",
            FlowNodeType::OpenEnded,
            "Describe the issue you are facing and I will do my best to help.",
        )
        .with_ai_handling()
        .with_next("contact-form"),
        contact_form("To better assist you, may I have your contact information?"),
    ]
}

fn healthcare_nodes() -> Vec<FlowNode> {
    vec![
        FlowNode::new("start", FlowNodeType::MultipleChoice, "What brings you here today?")
            .with_option("Book an appointment", "booking")
            .with_option("Medical information", "medical-info")
            .with_option("Insurance questions", "insurance")
            .with_option("Emergency", "emergency"),
        FlowNode::new(
            "booking",
            FlowNodeType::MultipleChoice,
            "Which kind of appointment would you like to book?",
        )
        .with_option("General consultation", "contact-form")
        .with_option("Specialist visit", "contact-form")
        .with_option("Follow-up visit", "contact-form"),
        FlowNode::new(
            "medical-info",
            FlowNodeType::OpenEnded,
            "Which health topic can I help you with?",
        )
        .with_ai_handling()
        .with_next("contact-form"),
        FlowNode::new(
            "insurance",
            FlowNodeType::Statement,
            "We work with most major insurance plans, public and private.",
        )
        .with_next("contact-form"),
        FlowNode::new(
            "emergency",
            FlowNodeType::Statement,
            "If this is an emergency, call your local emergency number or visit the nearest emergency room.",
        )
        .with_next("end"),
        contact_form("So our team can follow up, may I have your contact information?"),
    ]
}

fn ecommerce_nodes() -> Vec<FlowNode> {
    vec![
        FlowNode::new("start", FlowNodeType::MultipleChoice, "What can I help you with?")
            .with_option("Product recommendations", "products")
            .with_option("Order tracking", "order-tracking")
            .with_option("Returns and refunds", "returns"),
        FlowNode::new(
            "products",
            FlowNodeType::OpenEnded,
            "What kind of product are you looking for?",
        )
        .with_ai_handling()
        .with_next("contact-form"),
        FlowNode::new(
            "order-tracking",
            FlowNodeType::Statement,
            "Have your order number ready and I will point you to the latest shipment status.",
        )
        .with_next("contact-form"),
        FlowNode::new("returns", FlowNodeType::MultipleChoice, "What would you like to know about returns?")
            .with_option("Return policy", "return-policy")
            .with_option("Start a return", "contact-form"),
        FlowNode::new(
            "return-policy",
            FlowNodeType::Statement,
            "Most items can be returned within 30 days in their original condition.",
        )
        .with_next("start"),
        contact_form("To give you personalised help, may I have your contact details?"),
    ]
}
