//! Prompts for LLM-based work-order field extraction.
//!
//! Every prompt lives here so the extractor in [`crate::extract`] only deals
//! with transport and parsing. Unit tests inspect the prompts directly.

/// System prompt explaining what each work-order field means.
pub const EXTRACTION_SYSTEM_PROMPT: &str = "You are an assistant that extracts structured data from unstructured text. \
Your task is to extract relevant details and format them as JSON in the specified format. \
Here the 'paymentbillingname' is the landlord's name. \
'paymentponumber' is the work order number. \
'shippingcity', 'shippingstreet', and 'shippingpostalcode' are mentioned in the property address. \
'shippingemail', 'shippingname', and 'shippingphone' provide tenant details. \
'fault_detail' is a short sentence about the work order. \
'instruction_notes' is a detailed description of the work order, including the issue, \
what to do, customer wishes, and any special notes or prices. \
'shippingcompanyname' should be the company name for billing if applicable. \
'type' indicates whether the work order is a repair or a replacement. \
'propertymanagerdetails' contains the details of the work manager or the person who instructed the work order.";

/// Empty record the model is asked to fill in.
pub const EXTRACTION_SCHEMA: &str = r#"{
  "access_key": "",
  "email": "",
  "fault_detail": "",
  "instruction_notes": "",
  "paymentbillingname": "",
  "paymentcompanyname": "",
  "paymentponumber": "",
  "propertymanagerdetails": {
    "payment_buyer_name": "",
    "paymentbuyeremail": "",
    "paymentbyerphone": ""
  },
  "shippingcity": "",
  "shippingemail": "",
  "shippingname": "",
  "shippingphone": "",
  "shippingpostalcode": "",
  "shippingstreet": "",
  "type": "",
  "shippingcompanyname": ""
}"#;

/// Build the user message for one document's OCR text.
pub fn extraction_request(text: &str) -> String {
    format!(
        "Extract the relevant details from the following text and return a JSON response in the specified format:\n\
         {}\n\nText:\n{}\n\n\
         Ensure all details are filled correctly based on the provided text. Provide the JSON output only.",
        EXTRACTION_SCHEMA, text
    )
}
